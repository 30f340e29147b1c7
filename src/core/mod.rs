//! Core domain models for the job runner
//!
//! This module defines the steps, contexts, results and expression
//! evaluation shared by the execution layer.

pub mod config;
pub mod context;
pub mod env;
pub mod expression;
pub mod parallel;
pub mod state;
pub mod step;

pub use context::*;
pub use env::CaseInsensitiveMap;
pub use expression::{EvaluationError, ExpressionEvaluator, FunctionInfo, TemplateEvaluator};
pub use parallel::ParallelStep;
pub use state::*;
pub use step::*;
