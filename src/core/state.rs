//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Terminal classification of a step or job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskResult {
    /// Step logic ran and reported no problems
    Succeeded,
    /// Step finished but reported warnings or non-fatal errors
    SucceededWithIssues,
    /// Step was cancelled along with its job
    Cancelled,
    /// Step failed, timed out, or could not be prepared
    Failed,
    /// Step was not run because its condition was false
    Skipped,
}

impl TaskResult {
    /// Position in the worst-wins ordering used when merging results.
    ///
    /// `Skipped < Succeeded < SucceededWithIssues < Cancelled < Failed`
    fn severity(self) -> u8 {
        match self {
            TaskResult::Skipped => 0,
            TaskResult::Succeeded => 1,
            TaskResult::SucceededWithIssues => 2,
            TaskResult::Cancelled => 3,
            TaskResult::Failed => 4,
        }
    }

    /// Merge two results, the worse one wins
    pub fn merge(self, other: TaskResult) -> TaskResult {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Merge an optional current result with an incoming one
    pub fn merge_optional(current: Option<TaskResult>, incoming: TaskResult) -> TaskResult {
        match current {
            Some(current) => current.merge(incoming),
            None => incoming,
        }
    }

    /// Whether the result counts as a success for `success()` checks
    pub fn is_success(self) -> bool {
        matches!(
            self,
            TaskResult::Succeeded | TaskResult::SucceededWithIssues | TaskResult::Skipped
        )
    }

    /// Value exposed to expressions as `steps.<id>.outcome`
    pub fn as_outcome(self) -> &'static str {
        match self {
            TaskResult::Succeeded | TaskResult::SucceededWithIssues => "success",
            TaskResult::Cancelled => "cancelled",
            TaskResult::Failed => "failure",
            TaskResult::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskResult::Succeeded => "Succeeded",
            TaskResult::SucceededWithIssues => "SucceededWithIssues",
            TaskResult::Cancelled => "Cancelled",
            TaskResult::Failed => "Failed",
            TaskResult::Skipped => "Skipped",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "succeeded" | "success" => Ok(TaskResult::Succeeded),
            "succeededwithissues" | "succeeded-with-issues" => Ok(TaskResult::SucceededWithIssues),
            "cancelled" | "canceled" => Ok(TaskResult::Cancelled),
            "failed" | "failure" => Ok(TaskResult::Failed),
            "skipped" => Ok(TaskResult::Skipped),
            other => Err(format!("Unknown task result: {}", other)),
        }
    }
}

/// Lifecycle of a step execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextState {
    /// Context created, step not yet prepared
    Pending,
    /// Step prepared and (about to be) running
    Running { started_at: DateTime<Utc> },
    /// Step finalized
    Completed {
        started_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
    },
}

impl ContextState {
    /// Check if the context reached its terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContextState::Completed { .. })
    }
}

/// Overall job run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Aggregated result so far (None until a step finishes)
    pub result: Option<TaskResult>,

    /// Total number of top-level steps
    pub total_steps: usize,

    /// Number of finalized top-level steps
    pub finished_steps: usize,
}

impl JobState {
    /// Create a new job state
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            started_at: None,
            completed_at: None,
            result: None,
            total_steps: 0,
            finished_steps: 0,
        }
    }

    /// Mark job as started
    pub fn start(&mut self, total_steps: usize) {
        self.started_at = Some(Utc::now());
        self.total_steps = total_steps;
    }

    /// Fold a finished step's conclusion into the job result
    pub fn record(&mut self, conclusion: TaskResult) {
        self.result = Some(TaskResult::merge_optional(self.result, conclusion));
        self.finished_steps += 1;
    }

    /// Current status as seen by status functions (`success()`, `failure()`)
    pub fn status(&self) -> TaskResult {
        self.result.unwrap_or(TaskResult::Succeeded)
    }

    /// Mark job as completed
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.finished_steps as f64 / self.total_steps as f64
    }
}
