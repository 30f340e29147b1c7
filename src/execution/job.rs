//! Job runner - runs a job's steps in order and aggregates the result

use crate::{
    core::{
        context::{ContextData, ExpressionValues, JobContext, ROOT_SCOPE},
        env::CaseInsensitiveMap,
        expression::{ExpressionEvaluator, TemplateEvaluator},
        parallel::ParallelStep,
        state::{JobState, TaskResult},
        step::{EnvBlock, Step},
    },
    execution::{
        executor::{StepExecutor, StepUnit},
        parallel::ParallelStepRunner,
    },
    runner::{OutputEncoding, PlatformEncoding, ShellStepRunner, StepRunner},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Events that can occur during a job run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    JobStarted {
        execution_id: Uuid,
        job_name: String,
    },
    StepStarted {
        step_id: String,
        display_name: String,
    },
    StepCompleted {
        step_id: String,
        outcome: TaskResult,
        conclusion: TaskResult,
    },
    StepSkipped {
        step_id: String,
    },
    JobCompleted {
        execution_id: Uuid,
        result: TaskResult,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Final state of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step_id: String,
    pub display_name: String,
    pub outcome: TaskResult,
    pub conclusion: TaskResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "CaseInsensitiveMap::is_empty")]
    pub outputs: CaseInsensitiveMap<String>,
    /// Children of a parallel step, in declaration order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StepReport>,
}

impl StepReport {
    fn from_unit(unit: &StepUnit) -> Self {
        let context = &unit.context;
        let outcome = context.result().unwrap_or(TaskResult::Succeeded);
        Self {
            step_id: unit.id().to_string(),
            display_name: context.display_name().to_string(),
            outcome,
            conclusion: context.conclusion().unwrap_or(outcome),
            errors: context.errors().map(str::to_string).collect(),
            outputs: context.outputs().clone(),
            children: Vec::new(),
        }
    }
}

/// Summary of a finished job run
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    pub state: JobState,
    pub steps: Vec<StepReport>,
}

impl JobReport {
    pub fn result(&self) -> TaskResult {
        self.state.status()
    }
}

/// Runs the steps of a job
pub struct JobRunner {
    coordinator: ParallelStepRunner,
    evaluator: Arc<dyn TemplateEvaluator>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl JobRunner {
    pub fn new(
        runner: Arc<dyn StepRunner>,
        encoding: Arc<dyn OutputEncoding>,
        evaluator: Arc<dyn TemplateEvaluator>,
    ) -> Self {
        let executor = StepExecutor::new(runner, encoding);
        Self {
            coordinator: ParallelStepRunner::new(executor, evaluator.clone()),
            evaluator,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runner backed by the shell runner and the default evaluator
    pub fn with_shell(default_shell: Option<String>) -> Self {
        Self::new(
            Arc::new(ShellStepRunner::new(default_shell)),
            Arc::new(PlatformEncoding),
            Arc::new(ExpressionEvaluator::new()),
        )
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Run every step in declaration order
    pub async fn run(&self, steps: &[Step], job: &JobContext) -> JobReport {
        let execution_id = job.execution_id();
        info!("Starting job: {} ({})", job.name(), execution_id);
        self.emit_event(ExecutionEvent::JobStarted {
            execution_id,
            job_name: job.name().to_string(),
        })
        .await;

        let mut state = JobState::new(execution_id);
        state.start(steps.len());
        let mut reports = Vec::with_capacity(steps.len());

        for step in steps {
            let status = Self::current_status(job, &state);
            let report = match self.should_run(step, job, status) {
                Ok(true) => self.run_step(step, job, status).await,
                Ok(false) => self.skip_step(step, job).await,
                Err(message) => Self::fail_step(step, job, message),
            };

            state.record(report.conclusion);
            info!(
                "Step {} finished: {} ({:.0}% of job)",
                report.step_id,
                report.conclusion,
                state.progress() * 100.0
            );
            reports.push(report);
        }

        if job.cancellation_token().is_cancelled() {
            state.result = Some(TaskResult::merge_optional(state.result, TaskResult::Cancelled));
        }
        state.complete();
        let result = state.status();
        info!("Job {} completed: {}", job.name(), result);
        self.emit_event(ExecutionEvent::JobCompleted {
            execution_id,
            result,
        })
        .await;

        JobReport {
            name: job.name().to_string(),
            state,
            steps: reports,
        }
    }

    /// Expression values for conditions and group outputs
    fn job_values(job: &JobContext) -> ExpressionValues {
        let env: CaseInsensitiveMap<ContextData> = job
            .environment_variables()
            .iter()
            .map(|(key, value)| (key.to_string(), ContextData::from(value.as_str())))
            .collect();

        let mut values = ExpressionValues::new();
        values.insert("env".to_string(), ContextData::Dictionary(env));
        values.insert(
            "steps".to_string(),
            ContextData::Steps(job.steps_context().scope(ROOT_SCOPE)),
        );
        values
    }

    /// Job status seen by conditions; a cancelled job reads as cancelled
    fn current_status(job: &JobContext, state: &JobState) -> TaskResult {
        let status = state.status();
        if job.cancellation_token().is_cancelled() {
            status.merge(TaskResult::Cancelled)
        } else {
            status
        }
    }

    fn should_run(
        &self,
        step: &Step,
        job: &JobContext,
        status: TaskResult,
    ) -> Result<bool, String> {
        self.evaluator
            .evaluate_condition(step.condition(), &Self::job_values(job), status)
            .map_err(|e| format!("Failed to evaluate condition '{}': {}", step.condition(), e))
    }

    async fn skip_step(&self, step: &Step, job: &JobContext) -> StepReport {
        info!("Skipping step {}: condition '{}' is false", step.id(), step.condition());
        self.emit_event(ExecutionEvent::StepSkipped {
            step_id: step.id().to_string(),
        })
        .await;

        let mut unit = StepUnit::for_job(step.clone(), job, ROOT_SCOPE);
        ParallelStepRunner::complete_step(&mut unit, Some(TaskResult::Skipped), None);
        StepReport::from_unit(&unit)
    }

    fn fail_step(step: &Step, job: &JobContext, message: String) -> StepReport {
        let mut unit = StepUnit::for_job(step.clone(), job, ROOT_SCOPE);
        unit.context.error(message);
        ParallelStepRunner::complete_step(&mut unit, Some(TaskResult::Failed), None);
        StepReport::from_unit(&unit)
    }

    async fn run_step(&self, step: &Step, job: &JobContext, status: TaskResult) -> StepReport {
        self.emit_event(ExecutionEvent::StepStarted {
            step_id: step.id().to_string(),
            display_name: step.display_name(),
        })
        .await;

        let report = match step {
            Step::Parallel(group) => self.run_group(step, group, job, status).await,
            _ => {
                let unit = StepUnit::for_job(step.clone(), job, ROOT_SCOPE);
                let run = self.coordinator.run(vec![unit], job).await;
                match run.into_declaration_order().pop() {
                    Some(unit) => StepReport::from_unit(&unit),
                    None => Self::fail_step(step, job, "Step did not report a result".to_string()),
                }
            }
        };

        self.emit_event(ExecutionEvent::StepCompleted {
            step_id: report.step_id.clone(),
            outcome: report.outcome,
            conclusion: report.conclusion,
        })
        .await;
        report
    }

    async fn run_group(
        &self,
        step: &Step,
        group: &ParallelStep,
        job: &JobContext,
        status: TaskResult,
    ) -> StepReport {
        // Children whose condition is false never reach the coordinator
        let mut launched = Vec::new();
        let mut units = Vec::new();
        let mut held_back = Vec::new();
        for (index, child) in group.steps().iter().enumerate() {
            match self.should_run(child, job, status) {
                Ok(true) => {
                    launched.push(index);
                    units.push(StepUnit::for_job(child.clone(), job, ROOT_SCOPE));
                }
                Ok(false) => held_back.push((index, self.skip_step(child, job).await)),
                Err(message) => held_back.push((index, Self::fail_step(child, job, message))),
            }
        }

        let run = self.coordinator.run(units, job).await;
        for unit in run.units() {
            let child = StepReport::from_unit(unit);
            self.emit_event(ExecutionEvent::StepCompleted {
                step_id: child.step_id,
                outcome: child.outcome,
                conclusion: child.conclusion,
            })
            .await;
        }

        let mut result = run
            .units()
            .filter_map(|unit| unit.context.conclusion())
            .chain(held_back.iter().map(|(_, report)| report.conclusion))
            .reduce(TaskResult::merge)
            .unwrap_or(TaskResult::Succeeded);

        let mut children: Vec<(usize, StepReport)> = launched
            .into_iter()
            .zip(run.into_declaration_order().iter().map(StepReport::from_unit))
            .chain(held_back)
            .collect();
        children.sort_by_key(|(index, _)| *index);
        let children: Vec<StepReport> = children.into_iter().map(|(_, report)| report).collect();

        // The group itself is recorded like any other step
        let mut unit = StepUnit::for_job(step.clone(), job, ROOT_SCOPE);
        if !group.outputs().is_empty() {
            let declared: EnvBlock = group
                .outputs()
                .iter()
                .map(|(name, template)| (name.to_string(), template.clone()))
                .collect();
            match self.evaluator.evaluate_step_environment(
                &declared,
                &Self::job_values(job),
                unit.context.expression_functions(),
            ) {
                Ok(outputs) => {
                    for (name, value) in outputs.iter() {
                        unit.context.set_output(name, value.clone());
                    }
                }
                Err(e) => {
                    warn!("Failed to evaluate outputs of group {}: {}", group.common.id, e);
                    unit.context.error(e.to_string());
                    result = result.merge(TaskResult::Failed);
                }
            }
        }
        ParallelStepRunner::complete_step(&mut unit, Some(result), None);

        let mut report = StepReport::from_unit(&unit);
        report.children = children;
        report
    }
}
