//! Job and step execution contexts

use crate::core::{
    env::CaseInsensitiveMap,
    expression::{FunctionInfo, DEFAULT_FUNCTIONS},
    state::{ContextState, TaskResult},
    step::Step,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Scope name for steps declared directly in the job
pub const ROOT_SCOPE: &str = "";

/// A value bound in the expression context
#[derive(Debug, Clone)]
pub enum ContextData {
    String(String),
    Boolean(bool),
    Number(f64),
    Dictionary(CaseInsensitiveMap<ContextData>),
    /// Live view of the finished steps in one scope
    Steps(StepsScope),
}

impl ContextData {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextData::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dictionary(&self) -> Option<&CaseInsensitiveMap<ContextData>> {
        match self {
            ContextData::Dictionary(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_dictionary_mut(&mut self) -> Option<&mut CaseInsensitiveMap<ContextData>> {
        match self {
            ContextData::Dictionary(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for ContextData {
    fn from(value: &str) -> Self {
        ContextData::String(value.to_string())
    }
}

impl From<String> for ContextData {
    fn from(value: String) -> Self {
        ContextData::String(value)
    }
}

/// Named bindings available to expressions (`env`, `steps`, ...)
pub type ExpressionValues = HashMap<String, ContextData>;

/// Recorded status of a finished step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    /// Result before `continue_on_error` is applied
    pub outcome: TaskResult,
    /// Result after `continue_on_error` is applied
    pub conclusion: TaskResult,
    /// Outputs set by the step
    pub outputs: CaseInsensitiveMap<String>,
}

type ScopeTable = HashMap<String, HashMap<String, StepStatus>>;

/// Shared record of finished steps, partitioned by scope
///
/// Entries are only ever added; a step id is recorded at most once per
/// scope. Step ids compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StepsContext {
    inner: Arc<RwLock<ScopeTable>>,
}

impl StepsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// View of a single scope
    pub fn scope(&self, name: &str) -> StepsScope {
        StepsScope {
            context: self.clone(),
            name: name.to_string(),
        }
    }

    /// Record a finished step. Returns false if the id was already recorded.
    pub fn record(&self, scope: &str, step_id: &str, status: StepStatus) -> bool {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let steps = table.entry(scope.to_string()).or_default();
        let key = step_id.to_ascii_lowercase();
        if steps.contains_key(&key) {
            return false;
        }
        steps.insert(key, status);
        true
    }

    fn get(&self, scope: &str, step_id: &str) -> Option<StepStatus> {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        table
            .get(scope)
            .and_then(|steps| steps.get(&step_id.to_ascii_lowercase()))
            .cloned()
    }

    fn len(&self, scope: &str) -> usize {
        let table = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        table.get(scope).map_or(0, HashMap::len)
    }
}

/// Read view over one scope of the [`StepsContext`]
#[derive(Debug, Clone)]
pub struct StepsScope {
    context: StepsContext,
    name: String,
}

impl StepsScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, step_id: &str) -> Option<StepStatus> {
        self.context.get(&self.name, step_id)
    }

    pub fn len(&self) -> usize {
        self.context.len(&self.name)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Job-level context shared (read-only) by every step of a run
#[derive(Debug)]
pub struct JobContext {
    execution_id: Uuid,
    name: String,
    environment_variables: Arc<CaseInsensitiveMap<String>>,
    steps_context: StepsContext,
    cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(
        name: impl Into<String>,
        environment_variables: CaseInsensitiveMap<String>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            name: name.into(),
            environment_variables: Arc::new(environment_variables),
            steps_context: StepsContext::new(),
            cancellation,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global environment snapshot
    pub fn environment_variables(&self) -> &CaseInsensitiveMap<String> {
        &self.environment_variables
    }

    pub fn steps_context(&self) -> &StepsContext {
        &self.steps_context
    }

    /// Root (job-wide) cancellation signal
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Create a fresh context for a step in the given scope
    pub fn create_step_context(&self, step: &Step, scope: &str) -> ExecutionContext {
        ExecutionContext {
            display_name: step.display_name(),
            context_name: step.id().to_string(),
            scope_name: scope.to_string(),
            continue_on_error: step.continue_on_error(),
            timeout: step.timeout(),
            expression_values: ExpressionValues::new(),
            expression_functions: DEFAULT_FUNCTIONS.to_vec(),
            cancellation: self.cancellation.child_token(),
            root_cancellation: self.cancellation.clone(),
            steps_context: self.steps_context.clone(),
            result: None,
            command_result: None,
            result_code: None,
            issues: Vec::new(),
            outputs: CaseInsensitiveMap::new(),
            state: ContextState::Pending,
            deadline: None,
        }
    }
}

/// Severity of a recorded issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueKind {
    Error,
    Warning,
}

/// An error or warning recorded against a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
}

/// Mutable state of one step's run
///
/// Each context is owned by exactly one step for the duration of its run and
/// is moved into the task that runs the step.
#[derive(Debug)]
pub struct ExecutionContext {
    display_name: String,
    context_name: String,
    scope_name: String,
    continue_on_error: bool,
    timeout: Option<Duration>,
    expression_values: ExpressionValues,
    expression_functions: Vec<FunctionInfo>,
    cancellation: CancellationToken,
    root_cancellation: CancellationToken,
    steps_context: StepsContext,
    result: Option<TaskResult>,
    command_result: Option<TaskResult>,
    result_code: Option<String>,
    issues: Vec<Issue>,
    outputs: CaseInsensitiveMap<String>,
    state: ContextState,
    deadline: Option<JoinHandle<()>>,
}

impl ExecutionContext {
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Step id under which the step is recorded in the steps context
    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Override the step timeout; takes effect on [`start`](Self::start)
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn expression_values(&self) -> &ExpressionValues {
        &self.expression_values
    }

    pub fn expression_values_mut(&mut self) -> &mut ExpressionValues {
        &mut self.expression_values
    }

    pub fn expression_functions(&self) -> &[FunctionInfo] {
        &self.expression_functions
    }

    /// The step's own cancellation signal (fires on timeout or job cancel)
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn root_cancellation_token(&self) -> &CancellationToken {
        &self.root_cancellation
    }

    pub fn result(&self) -> Option<TaskResult> {
        self.result
    }

    pub fn set_result(&mut self, result: TaskResult) {
        self.result = Some(result);
    }

    /// Result requested by a workflow command during the run
    pub fn command_result(&self) -> Option<TaskResult> {
        self.command_result
    }

    pub fn set_command_result(&mut self, result: TaskResult) {
        self.command_result = Some(TaskResult::merge_optional(self.command_result, result));
    }

    pub fn result_code(&self) -> Option<&str> {
        self.result_code.as_deref()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.issues
            .iter()
            .filter(|issue| issue.kind == IssueKind::Error)
            .map(|issue| issue.message.as_str())
    }

    pub fn outputs(&self) -> &CaseInsensitiveMap<String> {
        &self.outputs
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.outputs.insert(name, value.into());
    }

    pub fn state(&self) -> &ContextState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, ContextState::Pending)
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Final result with `continue_on_error` applied (None until completed)
    pub fn conclusion(&self) -> Option<TaskResult> {
        if !self.is_completed() {
            return None;
        }
        self.result.map(|outcome| self.conclude(outcome))
    }

    /// Value of a variable in the bound `env` context
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.expression_values
            .get("env")
            .and_then(ContextData::as_dictionary)
            .and_then(|env| env.get(name))
            .and_then(ContextData::as_str)
    }

    /// Bound `env` context flattened to strings, for spawning processes
    pub fn environment(&self) -> Vec<(String, String)> {
        self.expression_values
            .get("env")
            .and_then(ContextData::as_dictionary)
            .map(|env| {
                env.iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|v| (key.to_string(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark the step as running and arm its timeout.
    ///
    /// # Panics
    ///
    /// If the context was already started; contexts are never reused.
    pub fn start(&mut self) {
        assert!(
            self.is_pending(),
            "execution context for step '{}' was already started",
            self.context_name
        );
        self.state = ContextState::Running {
            started_at: Utc::now(),
        };

        if let Some(timeout) = self.timeout {
            let token = self.cancellation.clone();
            let step = self.context_name.clone();
            self.deadline = Some(tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        debug!("Step {} reached its timeout of {:?}", step, timeout);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            }));
        }
    }

    /// Finalize the step.
    ///
    /// `result` and `result_code` override what the run recorded when given.
    /// Without any result the step counts as succeeded.
    ///
    /// # Panics
    ///
    /// If the context was already completed.
    pub fn complete(&mut self, result: Option<TaskResult>, result_code: Option<String>) {
        assert!(
            !self.is_completed(),
            "execution context for step '{}' was completed twice",
            self.context_name
        );

        if let Some(result) = result {
            self.result = Some(result);
        }
        if result_code.is_some() {
            self.result_code = result_code;
        }
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }

        let outcome = *self.result.get_or_insert(TaskResult::Succeeded);
        let conclusion = self.conclude(outcome);

        let started_at = match &self.state {
            ContextState::Running { started_at } => Some(*started_at),
            _ => None,
        };
        self.state = ContextState::Completed {
            started_at,
            completed_at: Utc::now(),
        };

        if !self.context_name.is_empty() {
            let recorded = self.steps_context.record(
                &self.scope_name,
                &self.context_name,
                StepStatus {
                    outcome,
                    conclusion,
                    outputs: self.outputs.clone(),
                },
            );
            if !recorded {
                warn!(
                    "Step '{}' was already recorded in scope '{}'",
                    self.context_name, self.scope_name
                );
            }
        }

        info!("Step '{}' completed: {}", self.display_name, outcome);
    }

    fn conclude(&self, outcome: TaskResult) -> TaskResult {
        if self.continue_on_error && outcome == TaskResult::Failed {
            TaskResult::Succeeded
        } else {
            outcome
        }
    }

    /// Record an error against the step
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("[{}] {}", self.display_name, message);
        self.issues.push(Issue {
            kind: IssueKind::Error,
            message,
        });
    }

    /// Record a warning against the step
    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[{}] {}", self.display_name, message);
        self.issues.push(Issue {
            kind: IssueKind::Warning,
            message,
        });
    }

    pub fn debug(&self, message: &str) {
        debug!("[{}] {}", self.display_name, message);
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
    }
}
