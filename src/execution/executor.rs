//! Step executor - the run routine of a single step unit

use crate::{
    core::{
        context::{ContextData, ExecutionContext, JobContext},
        env::CaseInsensitiveMap,
        state::TaskResult,
        step::Step,
    },
    runner::{OutputEncoding, StepError, StepRunner},
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Message recorded when a step's own deadline cancels it
pub const TIMEOUT_MESSAGE: &str = "The step has timed out.";

/// A step together with the context it exclusively owns for its run
#[derive(Debug)]
pub struct StepUnit {
    pub step: Step,
    pub context: ExecutionContext,
}

impl StepUnit {
    pub fn new(step: Step, context: ExecutionContext) -> Self {
        Self { step, context }
    }

    /// Create a unit with a fresh context in `scope`.
    ///
    /// Script steps bind their literal `env` map as the step's `env`
    /// expression value.
    pub fn for_job(step: Step, job: &JobContext, scope: &str) -> Self {
        let mut context = job.create_step_context(&step, scope);
        if let Step::Script(script) = &step {
            if !script.env.is_empty() {
                let env: CaseInsensitiveMap<ContextData> = script
                    .env
                    .iter()
                    .map(|(key, value)| (key.clone(), ContextData::from(value.as_str())))
                    .collect();
                context
                    .expression_values_mut()
                    .insert("env".to_string(), ContextData::Dictionary(env));
            }
        }
        Self { step, context }
    }

    pub fn id(&self) -> &str {
        self.step.id()
    }
}

/// Executes a single prepared step
#[derive(Clone)]
pub struct StepExecutor {
    runner: Arc<dyn StepRunner>,
    encoding: Arc<dyn OutputEncoding>,
}

impl StepExecutor {
    pub fn new(runner: Arc<dyn StepRunner>, encoding: Arc<dyn OutputEncoding>) -> Self {
        Self { runner, encoding }
    }

    /// Run the step and classify how it ended.
    ///
    /// Never fails: every outcome, a panic included, lands on the context.
    pub async fn execute(&self, unit: &mut StepUnit) {
        let StepUnit { step, context } = unit;
        debug!("Starting: {}", context.display_name());

        let run = async {
            if let Err(e) = self.encoding.prepare(context.cancellation_token()).await {
                warn!(
                    "Failed to prepare output encoding for '{}': {}",
                    context.display_name(),
                    e
                );
            }
            self.runner.run(step, context).await
        };

        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => Self::classify(context, error),
            Err(panic) => {
                context.error(format!("Step panicked: {}", panic_message(panic.as_ref())));
                context.set_result(TaskResult::Failed);
            }
        }

        if let Some(command_result) = context.command_result() {
            let result = context.result().unwrap_or(TaskResult::Succeeded);
            context.set_result(result.merge(command_result));
        }

        debug!("Finishing: {}", context.display_name());
    }

    fn classify(context: &mut ExecutionContext, error: StepError) {
        match error {
            StepError::Cancelled
                if context.cancellation_token().is_cancelled()
                    && !context.root_cancellation_token().is_cancelled() =>
            {
                context.error(TIMEOUT_MESSAGE);
                context.set_result(TaskResult::Failed);
            }
            StepError::Cancelled => {
                context.error(error.to_string());
                context.set_result(TaskResult::Cancelled);
            }
            other => {
                context.error(other.to_string());
                context.set_result(TaskResult::Failed);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
