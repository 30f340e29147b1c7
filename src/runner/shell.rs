//! Shell step runner - runs script steps as child processes

use crate::core::{
    context::ExecutionContext,
    state::TaskResult,
    step::{ScriptStep, Step},
};
use crate::execution::commands::WorkflowCommand;
use crate::runner::{StepError, StepRunner};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Runs `script` steps through a shell
#[derive(Debug, Clone, Default)]
pub struct ShellStepRunner {
    /// Shell used when a step doesn't name one
    default_shell: Option<String>,
}

impl ShellStepRunner {
    pub fn new(default_shell: Option<String>) -> Self {
        Self { default_shell }
    }

    fn shell_for<'a>(&'a self, step: &'a ScriptStep) -> &'a str {
        step.shell
            .as_deref()
            .or(self.default_shell.as_deref())
            .unwrap_or(if cfg!(windows) { "pwsh" } else { "sh" })
    }

    /// Program and arguments that run `script` in the given shell
    fn command_line(shell: &str, script: &str) -> (String, Vec<String>) {
        let args: &[&str] = match shell {
            "bash" => &["--noprofile", "--norc", "-e", "-o", "pipefail", "-c"],
            "sh" => &["-e", "-c"],
            "pwsh" | "powershell" => &["-NoProfile", "-NonInteractive", "-Command"],
            "python" | "python3" => &["-c"],
            "cmd" => &["/D", "/E:ON", "/V:OFF", "/S", "/C"],
            _ => &["-c"],
        };
        let mut args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        args.push(script.to_string());
        (shell.to_string(), args)
    }

    async fn run_script(
        &self,
        step: &ScriptStep,
        context: &mut ExecutionContext,
    ) -> Result<(), StepError> {
        let shell = self.shell_for(step);
        let (program, args) = Self::command_line(shell, &step.run);
        debug!("Spawning {} for step '{}'", program, step.common.id);

        let mut command = Command::new(&program);
        command
            .args(&args)
            .envs(context.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &step.working_directory {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| StepError::Failed(format!("Failed to start '{}': {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StepError::Failed("Child process has no stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| StepError::Failed("Child process has no stderr".to_string()))?;

        let name = context.display_name().to_string();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("[{}] {}", name, line);
            }
        });

        let token = context.cancellation_token().clone();
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    stderr_task.abort();
                    return Err(Self::kill(child).await);
                }
                line = lines.next_line() => match line? {
                    Some(line) => Self::handle_line(&line, context),
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            _ = token.cancelled() => {
                stderr_task.abort();
                return Err(Self::kill(child).await);
            }
            status = child.wait() => status?,
        };
        let _ = stderr_task.await;

        if status.success() {
            return Ok(());
        }
        let code = status.code().unwrap_or(-1);
        Err(StepError::Failed(format!(
            "Process completed with exit code {}.",
            code
        )))
    }

    fn handle_line(line: &str, context: &mut ExecutionContext) {
        match WorkflowCommand::parse(line) {
            Some(Ok(command)) => command.apply(context),
            Some(Err(e)) => context.warning(format!("Unable to process command '{}': {}", line, e)),
            None => info!("[{}] {}", context.display_name(), line),
        }
    }

    async fn kill(mut child: Child) -> StepError {
        if let Err(e) = child.kill().await {
            warn!("Failed to kill step process: {}", e);
        }
        StepError::Cancelled
    }
}

#[async_trait]
impl StepRunner for ShellStepRunner {
    async fn run(&self, step: &Step, context: &mut ExecutionContext) -> Result<(), StepError> {
        // Preparation already failed the step; there is nothing to run
        if context.result() == Some(TaskResult::Failed) {
            return Ok(());
        }

        match step {
            Step::Script(script) => self.run_script(script, context).await,
            Step::Action(action) => Err(StepError::Unsupported(format!(
                "action '{}' cannot be run by the shell runner",
                action.uses
            ))),
            Step::Parallel(group) => Err(StepError::Unsupported(format!(
                "parallel step '{}' must be run by the parallel step runner",
                group.common.id
            ))),
        }
    }
}
