//! Console output encoding setup

use crate::runner::StepError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Prepares the console so step output decodes as UTF-8
#[async_trait]
pub trait OutputEncoding: Send + Sync {
    async fn prepare(&self, cancellation: &CancellationToken) -> Result<(), StepError>;
}

/// Switches the Windows console code page to UTF-8; a no-op elsewhere
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformEncoding;

#[cfg(windows)]
#[async_trait]
impl OutputEncoding for PlatformEncoding {
    async fn prepare(&self, cancellation: &CancellationToken) -> Result<(), StepError> {
        use tokio::process::Command;
        use tracing::debug;

        let mut command = Command::new("cmd");
        command.args(["/c", "chcp", "65001"]).kill_on_drop(true);

        let output = tokio::select! {
            _ = cancellation.cancelled() => return Err(StepError::Cancelled),
            output = command.output() => output?,
        };
        if !output.status.success() {
            return Err(StepError::Failed(format!(
                "Failed to switch the console code page to UTF-8 (exit code {}).",
                output.status.code().unwrap_or(-1)
            )));
        }
        debug!("Console code page set to 65001");
        Ok(())
    }
}

#[cfg(not(windows))]
#[async_trait]
impl OutputEncoding for PlatformEncoding {
    async fn prepare(&self, _cancellation: &CancellationToken) -> Result<(), StepError> {
        Ok(())
    }
}
