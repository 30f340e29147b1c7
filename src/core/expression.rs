//! Template and condition evaluation
//!
//! Templates use `${{ ... }}` segments rendered with minijinja. Named values
//! (`env.NAME`, `steps.<id>.outputs.<name>`, `steps.<id>.outcome`) are looked
//! up case-insensitively; a missing key renders as an empty string, an unknown
//! root name is an error. Conditions are minijinja expressions and may call
//! the status functions `success()`, `failure()`, `always()` and
//! `cancelled()`.

use crate::core::{
    context::{ContextData, ExpressionValues, StepsScope},
    env::CaseInsensitiveMap,
    state::TaskResult,
    step::{EnvBlock, DEFAULT_CONDITION},
};
use minijinja::value::{Object, Value};
use minijinja::{syntax::SyntaxConfig, Environment, State, UndefinedBehavior};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::warn;

/// Signature of a function callable from expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: &'static str,
    pub min_parameters: usize,
    pub max_parameters: usize,
}

impl FunctionInfo {
    pub const fn new(name: &'static str, min_parameters: usize, max_parameters: usize) -> Self {
        Self {
            name,
            min_parameters,
            max_parameters,
        }
    }
}

/// Functions available when evaluating step templates
pub const DEFAULT_FUNCTIONS: &[FunctionInfo] = &[
    FunctionInfo::new("contains", 2, 2),
    FunctionInfo::new("startsWith", 2, 2),
    FunctionInfo::new("endsWith", 2, 2),
];

/// Status functions, only available in step conditions
pub const STATUS_FUNCTIONS: &[FunctionInfo] = &[
    FunctionInfo::new("success", 0, 0),
    FunctionInfo::new("failure", 0, 0),
    FunctionInfo::new("always", 0, 0),
    FunctionInfo::new("cancelled", 0, 0),
];

/// Errors raised while evaluating an expression
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Template(#[from] minijinja::Error),

    #[error("The template is not valid. {key}: '{template}': {source}")]
    InvalidValue {
        key: String,
        template: String,
        source: minijinja::Error,
    },
}

/// Evaluates templates and conditions for the runner
pub trait TemplateEvaluator: Send + Sync {
    /// Evaluate a step's declared env block into plain strings
    fn evaluate_step_environment(
        &self,
        environment: &EnvBlock,
        values: &ExpressionValues,
        functions: &[FunctionInfo],
    ) -> Result<CaseInsensitiveMap<String>, EvaluationError>;

    /// Evaluate a step condition against the current job status
    fn evaluate_condition(
        &self,
        condition: &str,
        values: &ExpressionValues,
        job_status: TaskResult,
    ) -> Result<bool, EvaluationError>;
}

/// Default [`TemplateEvaluator`], backed by minijinja
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Render a template string, substituting every `${{ ... }}` segment
    pub fn render(
        &self,
        template: &str,
        values: &ExpressionValues,
        functions: &[FunctionInfo],
    ) -> Result<String, EvaluationError> {
        let env = environment(functions)?;
        Ok(env.render_str(template, root_value(values, None))?)
    }
}

impl TemplateEvaluator for ExpressionEvaluator {
    fn evaluate_step_environment(
        &self,
        environment_block: &EnvBlock,
        values: &ExpressionValues,
        functions: &[FunctionInfo],
    ) -> Result<CaseInsensitiveMap<String>, EvaluationError> {
        let env = environment(functions)?;
        let context = root_value(values, None);

        let mut evaluated = CaseInsensitiveMap::new();
        for (key, template) in environment_block {
            let value = env.render_str(template, context.clone()).map_err(|source| {
                EvaluationError::InvalidValue {
                    key: format!("env.{}", key),
                    template: template.clone(),
                    source,
                }
            })?;
            evaluated.insert(key.clone(), value);
        }
        Ok(evaluated)
    }

    fn evaluate_condition(
        &self,
        condition: &str,
        values: &ExpressionValues,
        job_status: TaskResult,
    ) -> Result<bool, EvaluationError> {
        let mut expression = condition.trim();
        if let Some(inner) = expression
            .strip_prefix("${{")
            .and_then(|rest| rest.strip_suffix("}}"))
        {
            expression = inner.trim();
        }
        if expression.is_empty() {
            expression = DEFAULT_CONDITION;
        }

        // Conditions without a status check only run while the job succeeds
        let expression = if status_call_regex().is_match(expression) {
            expression.to_string()
        } else {
            format!("success() and ({})", expression)
        };

        let functions: Vec<FunctionInfo> = DEFAULT_FUNCTIONS
            .iter()
            .chain(STATUS_FUNCTIONS)
            .copied()
            .collect();
        let env = environment(&functions)?;
        let compiled = env.compile_expression(&expression)?;
        let value = compiled.eval(root_value(values, Some(job_status)))?;
        Ok(value.is_true())
    }
}

fn status_call_regex() -> &'static Regex {
    static STATUS_CALL: OnceLock<Regex> = OnceLock::new();
    STATUS_CALL.get_or_init(|| {
        Regex::new(r"\b(success|failure|always|cancelled)\s*\(").expect("valid status regex")
    })
}

/// Environment with `${{ }}` delimiters and only the given functions
fn environment(functions: &[FunctionInfo]) -> Result<Environment<'static>, EvaluationError> {
    let syntax = SyntaxConfig::builder()
        .block_delimiters("${%", "%}")
        .variable_delimiters("${{", "}}")
        .comment_delimiters("${#", "#}")
        .build()?;

    let mut env = Environment::new();
    env.set_syntax(syntax);
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);

    for info in functions {
        match info.name {
            "contains" => env.add_function("contains", contains),
            "startsWith" => env.add_function("startsWith", starts_with),
            "endsWith" => env.add_function("endsWith", ends_with),
            "success" => env.add_function("success", success),
            "failure" => env.add_function("failure", failure),
            "always" => env.add_function("always", always),
            "cancelled" => env.add_function("cancelled", cancelled),
            other => warn!("Expression function '{}' has no implementation", other),
        }
    }
    Ok(env)
}

fn lowered(value: &Value) -> String {
    value.to_string().to_lowercase()
}

fn contains(haystack: Value, needle: Value) -> bool {
    lowered(&haystack).contains(&lowered(&needle))
}

fn starts_with(haystack: Value, prefix: Value) -> bool {
    lowered(&haystack).starts_with(&lowered(&prefix))
}

fn ends_with(haystack: Value, suffix: Value) -> bool {
    lowered(&haystack).ends_with(&lowered(&suffix))
}

/// Job status bound as `job.status` in condition contexts
fn job_status(state: &State) -> TaskResult {
    state
        .lookup("job")
        .and_then(|job| job.get_attr("status").ok())
        .and_then(|status| status.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(TaskResult::Succeeded)
}

fn success(state: &State) -> bool {
    job_status(state).is_success()
}

fn failure(state: &State) -> bool {
    job_status(state) == TaskResult::Failed
}

fn always(_state: &State) -> bool {
    true
}

fn cancelled(state: &State) -> bool {
    job_status(state) == TaskResult::Cancelled
}

/// Case-insensitive map exposed to templates
///
/// Root lookups of unknown names stay undefined so strict mode reports them;
/// nested lookups fall back to an empty string.
#[derive(Debug)]
struct Dictionary {
    entries: CaseInsensitiveMap<Value>,
    missing: Option<Value>,
}

impl Dictionary {
    fn root(entries: CaseInsensitiveMap<Value>) -> Value {
        Value::from_object(Self {
            entries,
            missing: None,
        })
    }

    fn nested(entries: CaseInsensitiveMap<Value>) -> Value {
        Value::from_object(Self {
            entries,
            missing: Some(Value::from("")),
        })
    }
}

impl Object for Dictionary {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str().and_then(|name| self.entries.get(name)) {
            Some(value) => Some(value.clone()),
            None => self.missing.clone(),
        }
    }
}

/// Live view of `steps`, read when the template asks for a step
#[derive(Debug)]
struct Steps(StepsScope);

impl Object for Steps {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let status = key.as_str().and_then(|id| self.0.get(id));

        let mut entries = CaseInsensitiveMap::new();
        let mut outputs = CaseInsensitiveMap::new();
        match status {
            Some(status) => {
                entries.insert("outcome", Value::from(status.outcome.as_outcome()));
                entries.insert("conclusion", Value::from(status.conclusion.as_outcome()));
                for (name, value) in status.outputs.iter() {
                    outputs.insert(name, Value::from(value.as_str()));
                }
            }
            None => {
                entries.insert("outcome", Value::from(""));
                entries.insert("conclusion", Value::from(""));
            }
        }
        entries.insert("outputs", Dictionary::nested(outputs));
        Some(Dictionary::nested(entries))
    }
}

fn to_value(data: &ContextData) -> Value {
    match data {
        ContextData::String(s) => Value::from(s.as_str()),
        ContextData::Boolean(b) => Value::from(*b),
        ContextData::Number(n) => Value::from(*n),
        ContextData::Dictionary(map) => Dictionary::nested(
            map.iter()
                .map(|(key, value)| (key.to_string(), to_value(value)))
                .collect(),
        ),
        ContextData::Steps(scope) => Value::from_object(Steps(scope.clone())),
    }
}

/// Top-level render context; conditions also get `job.status`
fn root_value(values: &ExpressionValues, job_status: Option<TaskResult>) -> Value {
    let mut entries: CaseInsensitiveMap<Value> = values
        .iter()
        .map(|(name, data)| (name.clone(), to_value(data)))
        .collect();
    if let Some(status) = job_status {
        let mut job = CaseInsensitiveMap::new();
        job.insert("status", Value::from(status.as_outcome()));
        entries.insert("job", Dictionary::nested(job));
    }
    Dictionary::root(entries)
}
