//! Step domain model

use crate::core::parallel::ParallelStep;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Declared environment block of a step: variable name -> template
pub type EnvBlock = BTreeMap<String, String>;

/// Condition applied when a step does not declare one
pub const DEFAULT_CONDITION: &str = "success()";

fn default_condition() -> String {
    DEFAULT_CONDITION.to_string()
}

fn is_default_condition(condition: &String) -> bool {
    condition == DEFAULT_CONDITION
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// A single step in a job
///
/// The variant set is closed; the runner, the parallel coordinator and the
/// serializer all match on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// Runs a packaged action (`uses:`)
    Action(ActionStep),
    /// Runs an inline script through a shell
    Script(ScriptStep),
    /// Runs its children concurrently
    Parallel(ParallelStep),
}

/// Fields shared by every step variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCommon {
    /// Unique step identifier (also the `steps.<id>` context name)
    pub id: String,

    /// Human-readable step name
    #[serde(default, rename = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Condition expression deciding whether the step runs
    #[serde(
        default = "default_condition",
        rename = "if",
        skip_serializing_if = "is_default_condition"
    )]
    pub condition: String,

    /// Whether a failure of this step is tolerated by the job
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_error: bool,

    /// Timeout in minutes (0 = no timeout)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub timeout_minutes: u32,
}

impl StepCommon {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            condition: default_condition(),
            continue_on_error: false,
            timeout_minutes: 0,
        }
    }
}

/// A step that runs a packaged action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    #[serde(flatten)]
    pub common: StepCommon,

    /// Action reference, e.g. `actions/checkout@v4`
    pub uses: String,

    /// Action inputs
    #[serde(default, rename = "with", skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,

    /// Environment block evaluated right before the step runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvBlock>,
}

/// A step that runs an inline script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    #[serde(flatten)]
    pub common: StepCommon,

    /// Script body
    pub run: String,

    /// Shell override (`bash`, `sh`, `pwsh`, `python`, `cmd`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Working directory override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// Literal step-level environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Step {
    /// Create a script step
    pub fn script(id: impl Into<String>, run: impl Into<String>) -> Self {
        Step::Script(ScriptStep {
            common: StepCommon::new(id),
            run: run.into(),
            shell: None,
            working_directory: None,
            env: BTreeMap::new(),
        })
    }

    /// Create an action step
    pub fn action(id: impl Into<String>, uses: impl Into<String>) -> Self {
        Step::Action(ActionStep {
            common: StepCommon::new(id),
            uses: uses.into(),
            inputs: BTreeMap::new(),
            env: None,
        })
    }

    pub fn common(&self) -> &StepCommon {
        match self {
            Step::Action(step) => &step.common,
            Step::Script(step) => &step.common,
            Step::Parallel(step) => &step.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut StepCommon {
        match self {
            Step::Action(step) => &mut step.common,
            Step::Script(step) => &mut step.common,
            Step::Parallel(step) => &mut step.common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    /// Name shown in logs; falls back to something derived from the step
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.common().display_name {
            return name.clone();
        }
        match self {
            Step::Action(step) => format!("Run {}", step.uses),
            Step::Script(step) => {
                let first_line = step.run.lines().next().unwrap_or_default().trim();
                format!("Run {}", first_line)
            }
            Step::Parallel(step) => step.common.id.clone(),
        }
    }

    pub fn condition(&self) -> &str {
        &self.common().condition
    }

    pub fn continue_on_error(&self) -> bool {
        self.common().continue_on_error
    }

    /// Step timeout, `None` when unlimited
    pub fn timeout(&self) -> Option<Duration> {
        match self.common().timeout_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(u64::from(minutes) * 60)),
        }
    }

    /// Environment block this step declares for evaluation before it runs.
    ///
    /// Only action steps can declare one; every other variant returns `None`.
    pub fn declared_environment(&self) -> Option<&EnvBlock> {
        match self {
            Step::Action(step) => step.env.as_ref(),
            Step::Script(_) | Step::Parallel(_) => None,
        }
    }

    /// Short variant name as used by the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Action(_) => "action",
            Step::Script(_) => "script",
            Step::Parallel(_) => "parallel",
        }
    }

    /// Collapse empty collections before encoding (recurses into groups)
    pub fn prepare_for_serialization(&mut self) {
        if let Step::Parallel(group) = self {
            group.prepare_for_serialization();
        }
    }
}
