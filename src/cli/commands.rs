//! CLI command definitions

use crate::core::config::parse_env_override;
use clap::Args;

/// Run a job
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to job YAML file
    #[arg(short, long)]
    pub file: String,

    /// Environment overrides (KEY=VALUE), applied on top of the job's env
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a job definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to job YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse KEY=VALUE pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    parse_env_override(s).map_err(|e| e.to_string())
}
