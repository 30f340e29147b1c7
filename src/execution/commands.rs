//! Workflow commands emitted on step stdout
//!
//! A command line looks like `::name key=value,key=value::data`. Property
//! values and data are percent-escaped for the characters that would break
//! the framing.

use crate::core::{context::ExecutionContext, state::TaskResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Errors raised for malformed workflow commands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Command '{command}' requires the '{property}' property")]
    MissingProperty { command: String, property: String },

    #[error("Invalid result '{0}'")]
    InvalidResult(String),
}

/// A parsed workflow command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowCommand {
    SetOutput { name: String, value: String },
    Error(String),
    Warning(String),
    Debug(String),
    SetResult(TaskResult),
    /// Well-formed but not understood; ignored
    Unknown(String),
}

fn command_regex() -> &'static Regex {
    static COMMAND: OnceLock<Regex> = OnceLock::new();
    COMMAND.get_or_init(|| {
        Regex::new(r"^::([A-Za-z][A-Za-z0-9_-]*)(?:\s+([^:]*))?::(.*)$")
            .expect("valid command regex")
    })
}

fn unescape_data(value: &str) -> String {
    value
        .replace("%0D", "\r")
        .replace("%0A", "\n")
        .replace("%25", "%")
}

fn unescape_property(value: &str) -> String {
    value
        .replace("%0D", "\r")
        .replace("%0A", "\n")
        .replace("%3A", ":")
        .replace("%2C", ",")
        .replace("%25", "%")
}

fn parse_properties(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), unescape_property(value.trim())))
        .collect()
}

impl WorkflowCommand {
    /// Parse a stdout line. Returns `None` when the line is not a command.
    pub fn parse(line: &str) -> Option<Result<Self, CommandError>> {
        let captures = command_regex().captures(line.trim_end())?;
        let name = captures.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
        let properties = parse_properties(captures.get(2).map_or("", |m| m.as_str()));
        let data = unescape_data(captures.get(3).map_or("", |m| m.as_str()));

        let command = match name.as_str() {
            "set-output" => match properties.get("name") {
                Some(output) if !output.is_empty() => Ok(WorkflowCommand::SetOutput {
                    name: output.clone(),
                    value: data,
                }),
                _ => Err(CommandError::MissingProperty {
                    command: name,
                    property: "name".to_string(),
                }),
            },
            "error" => Ok(WorkflowCommand::Error(data)),
            "warning" => Ok(WorkflowCommand::Warning(data)),
            "debug" => Ok(WorkflowCommand::Debug(data)),
            "set-result" => data
                .parse::<TaskResult>()
                .map(WorkflowCommand::SetResult)
                .map_err(|_| CommandError::InvalidResult(data)),
            _ => Ok(WorkflowCommand::Unknown(name)),
        };
        Some(command)
    }

    /// Apply the command to the running step
    pub fn apply(self, context: &mut ExecutionContext) {
        match self {
            WorkflowCommand::SetOutput { name, value } => context.set_output(name, value),
            WorkflowCommand::Error(message) => context.error(message),
            WorkflowCommand::Warning(message) => context.warning(message),
            WorkflowCommand::Debug(message) => context.debug(&message),
            WorkflowCommand::SetResult(result) => context.set_command_result(result),
            WorkflowCommand::Unknown(name) => {
                debug!("Ignoring unknown workflow command '{}'", name);
            }
        }
    }
}
