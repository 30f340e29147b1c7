//! jobrunner - a CI/CD job runner with parallel step groups

pub mod cli;
pub mod core;
pub mod execution;
pub mod runner;

// Re-export commonly used types
pub use crate::core::{
    CaseInsensitiveMap, EvaluationError, ExecutionContext, ExpressionEvaluator, JobContext,
    ParallelStep, Step, TaskResult, TemplateEvaluator,
};
pub use execution::{
    ExecutionEvent, GroupRun, JobRunner, ParallelStepRunner, StepExecutor, StepUnit,
};
pub use runner::{OutputEncoding, PlatformEncoding, ShellStepRunner, StepError, StepRunner};
