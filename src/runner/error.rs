//! Step runner error types

use thiserror::Error;

/// Error types for step runs
#[derive(Debug, Error)]
pub enum StepError {
    /// The step's cancellation token fired (job cancel or timeout)
    #[error("The operation was canceled.")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported step: {0}")]
    Unsupported(String),
}

impl StepError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}
