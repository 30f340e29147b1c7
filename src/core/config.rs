//! Job configuration from YAML

use crate::core::{context::JobContext, env::CaseInsensitiveMap, step::Step};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Top-level job configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name
    pub name: String,

    /// Global environment available to every step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, Value>,

    /// Defaults applied to steps that don't override them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Defaults>,

    /// Job steps, run in declaration order
    pub steps: Vec<Step>,
}

/// Job-wide step defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defaults {
    /// Shell used by script steps without an explicit `shell`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

impl JobConfig {
    /// Load job configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid job file: {}", path.display()))
    }

    /// Parse job configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: JobConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the job configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Job name cannot be empty");
        }

        // Step ids share one namespace, nested or not
        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            Self::validate_step(step, &mut seen_ids, false)?;
        }

        for (key, value) in &self.env {
            if scalar_to_string(value).is_none() {
                anyhow::bail!("Environment variable '{}' must be a scalar value", key);
            }
        }

        Ok(())
    }

    fn validate_step(step: &Step, seen_ids: &mut HashSet<String>, nested: bool) -> Result<()> {
        let id = step.id();
        if id.trim().is_empty() {
            anyhow::bail!("Step ID cannot be empty");
        }
        if !seen_ids.insert(id.to_ascii_lowercase()) {
            anyhow::bail!("Duplicate step ID: {}", id);
        }

        match step {
            Step::Script(script) => {
                if script.run.trim().is_empty() {
                    anyhow::bail!("Step '{}' has an empty run script", id);
                }
            }
            Step::Action(action) => {
                if action.uses.trim().is_empty() {
                    anyhow::bail!("Step '{}' has an empty uses reference", id);
                }
            }
            Step::Parallel(group) => {
                if nested {
                    anyhow::bail!(
                        "Parallel step '{}' cannot be nested in another parallel step",
                        id
                    );
                }
                for child in group.steps() {
                    Self::validate_step(child, seen_ids, true)?;
                }
            }
        }

        Ok(())
    }

    /// Global environment with scalar values rendered as strings
    pub fn environment(&self) -> CaseInsensitiveMap<String> {
        self.env
            .iter()
            .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key.clone(), v)))
            .collect()
    }

    /// Shell for script steps without an explicit `shell`
    pub fn default_shell(&self) -> Option<&str> {
        self.defaults.as_ref().and_then(|d| d.shell.as_deref())
    }

    /// Collapse empty step collections before encoding
    pub fn prepare_for_serialization(&mut self) {
        for step in &mut self.steps {
            step.prepare_for_serialization();
        }
    }

    /// Build the job context, applying `overrides` on top of the configured env
    pub fn to_job_context(
        &self,
        overrides: &[(String, String)],
        cancellation: CancellationToken,
    ) -> JobContext {
        let mut environment = self.environment();
        for (key, value) in overrides {
            environment.insert(key.clone(), value.clone());
        }
        JobContext::new(self.name.clone(), environment, cancellation)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// Parse a `KEY=VALUE` pair from the command line
pub fn parse_env_override(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{}'", raw))?;
    if key.trim().is_empty() {
        anyhow::bail!("Environment variable name cannot be empty in '{}'", raw);
    }
    Ok((key.trim().to_string(), value.to_string()))
}
