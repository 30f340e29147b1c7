//! Parallel step coordinator
//!
//! Prepares every step of a group in declaration order, launches each one
//! as its own task and finalizes them in the order they finish. Each
//! [`StepUnit`] is moved into its task and handed back on completion, so a
//! context is never touched by two tasks at once.

use crate::{
    core::{
        context::{ContextData, JobContext},
        env::CaseInsensitiveMap,
        expression::TemplateEvaluator,
        parallel::ParallelStep,
        state::TaskResult,
        step::Step,
    },
    execution::executor::{StepExecutor, StepUnit},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

/// Outcome of running one group: every unit, in the order it was finalized
#[derive(Debug, Default)]
pub struct GroupRun {
    finished: Vec<(usize, StepUnit)>,
}

impl GroupRun {
    pub fn len(&self) -> usize {
        self.finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finished.is_empty()
    }

    /// Finalized units in completion order
    pub fn units(&self) -> impl Iterator<Item = &StepUnit> {
        self.finished.iter().map(|(_, unit)| unit)
    }

    /// Step ids in the order they were finalized
    pub fn completion_order(&self) -> Vec<&str> {
        self.units().map(StepUnit::id).collect()
    }

    /// Units back in declaration order
    pub fn into_declaration_order(mut self) -> Vec<StepUnit> {
        self.finished.sort_by_key(|(index, _)| *index);
        self.finished.into_iter().map(|(_, unit)| unit).collect()
    }

    /// Merge of every unit's conclusion; `None` for an empty group
    pub fn result(&self) -> Option<TaskResult> {
        self.units()
            .filter_map(|unit| unit.context.conclusion())
            .reduce(TaskResult::merge)
    }
}

/// Runs a group of steps concurrently
#[derive(Clone)]
pub struct ParallelStepRunner {
    executor: StepExecutor,
    evaluator: Arc<dyn TemplateEvaluator>,
}

impl ParallelStepRunner {
    pub fn new(executor: StepExecutor, evaluator: Arc<dyn TemplateEvaluator>) -> Self {
        Self {
            executor,
            evaluator,
        }
    }

    /// Run the children of `group`, each with a fresh context in `scope`
    pub async fn run_group(
        &self,
        group: &ParallelStep,
        job: &JobContext,
        scope: &str,
    ) -> GroupRun {
        let units = group
            .steps()
            .iter()
            .map(|step| StepUnit::for_job(step.clone(), job, scope))
            .collect();
        self.run(units, job).await
    }

    /// Run `units` concurrently and wait until every one is finalized.
    ///
    /// # Panics
    ///
    /// If any unit's context was already started. Contexts are single-use.
    pub async fn run(&self, units: Vec<StepUnit>, job: &JobContext) -> GroupRun {
        for unit in &units {
            assert!(
                unit.context.is_pending(),
                "step '{}' was handed to the parallel runner with a used execution context",
                unit.id()
            );
        }

        info!("Running {} step(s) in parallel", units.len());
        let mut tasks = JoinSet::new();
        let mut launched = HashMap::new();
        for (index, mut unit) in units.into_iter().enumerate() {
            self.prepare(&mut unit, job);

            let step = unit.step.clone();
            let scope = unit.context.scope_name().to_string();
            let executor = self.executor.clone();
            let handle = tasks.spawn(async move {
                executor.execute(&mut unit).await;
                (index, unit)
            });
            launched.insert(handle.id(), (index, step, scope));
        }

        let mut run = GroupRun::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, (index, mut unit))) => {
                    launched.remove(&id);
                    Self::complete_step(&mut unit, None, None);
                    run.finished.push((index, unit));
                }
                Err(e) => {
                    error!("Step task ended without reporting back: {}", e);
                    if let Some((index, step, scope)) = launched.remove(&e.id()) {
                        run.finished.push((index, Self::lost_unit(step, job, &scope, &e)));
                    }
                }
            }
        }

        debug!("Parallel group finished: {:?}", run.completion_order());
        run
    }

    /// Stand-in for a unit whose task was lost, finalized as failed
    fn lost_unit(step: Step, job: &JobContext, scope: &str, e: &JoinError) -> StepUnit {
        let mut unit = StepUnit::for_job(step, job, scope);
        unit.context.start();
        unit.context.error(format!("The step did not report back: {}", e));
        Self::complete_step(&mut unit, Some(TaskResult::Failed), None);
        unit
    }

    /// Finalize a finished unit, optionally overriding its result and code
    pub fn complete_step(
        unit: &mut StepUnit,
        result: Option<TaskResult>,
        result_code: Option<String>,
    ) {
        unit.context.complete(result, result_code);
    }

    /// Start the context and bind `steps` and `env` for one unit
    fn prepare(&self, unit: &mut StepUnit, job: &JobContext) {
        let StepUnit { step, context } = unit;
        context.start();

        let steps = job.steps_context().scope(context.scope_name());
        context
            .expression_values_mut()
            .insert("steps".to_string(), ContextData::Steps(steps));

        debug!("Initialize env context for step '{}'", step.id());
        let mut env: CaseInsensitiveMap<ContextData> = job
            .environment_variables()
            .iter()
            .map(|(key, value)| (key.to_string(), ContextData::from(value.as_str())))
            .collect();
        if let Some(step_env) = context
            .expression_values()
            .get("env")
            .and_then(ContextData::as_dictionary)
        {
            env.extend_from(step_env);
        }
        context
            .expression_values_mut()
            .insert("env".to_string(), ContextData::Dictionary(env));

        let Some(block) = step.declared_environment() else {
            return;
        };
        let evaluated = self.evaluator.evaluate_step_environment(
            block,
            context.expression_values(),
            context.expression_functions(),
        );
        match evaluated {
            Ok(evaluated) => {
                if let Some(env) = context
                    .expression_values_mut()
                    .get_mut("env")
                    .and_then(ContextData::as_dictionary_mut)
                {
                    for (key, value) in evaluated.iter() {
                        env.insert(key, ContextData::from(value.as_str()));
                    }
                }
            }
            Err(e) => {
                // The step still launches so it reports back like every other unit
                context.error(e.to_string());
                context.set_result(TaskResult::Failed);
            }
        }
    }
}
