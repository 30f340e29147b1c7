//! Step run logic
//!
//! The [`StepRunner`] trait is the seam between the execution layer and
//! whatever actually carries out a step. [`ShellStepRunner`] runs script
//! steps as child processes.

pub mod encoding;
pub mod error;
pub mod shell;

use crate::core::{context::ExecutionContext, step::Step};
use async_trait::async_trait;
pub use encoding::{OutputEncoding, PlatformEncoding};
pub use error::StepError;
pub use shell::ShellStepRunner;

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the step, recording outputs and issues on `context`.
    ///
    /// Implementations should watch `context.cancellation_token()` and return
    /// [`StepError::Cancelled`] once it fires.
    async fn run(&self, step: &Step, context: &mut ExecutionContext) -> Result<(), StepError>;
}
