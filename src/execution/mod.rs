//! Step execution: the run routine, the parallel coordinator and the job runner

pub mod commands;
pub mod executor;
pub mod job;
pub mod parallel;

pub use commands::{CommandError, WorkflowCommand};
pub use executor::{StepExecutor, StepUnit, TIMEOUT_MESSAGE};
pub use job::{EventHandler, ExecutionEvent, JobReport, JobRunner, StepReport};
pub use parallel::{GroupRun, ParallelStepRunner};
