//! Parallel step group model

use crate::core::env::CaseInsensitiveMap;
use crate::core::step::{Step, StepCommon};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn is_absent_or_empty<T>(collection: &Option<T>) -> bool
where
    T: CollectionLen,
{
    collection.as_ref().map_or(true, |c| c.collection_len() == 0)
}

trait CollectionLen {
    fn collection_len(&self) -> usize;
}

impl<T> CollectionLen for Vec<T> {
    fn collection_len(&self) -> usize {
        self.len()
    }
}

impl<V> CollectionLen for CaseInsensitiveMap<V> {
    fn collection_len(&self) -> usize {
        self.len()
    }
}

fn empty_outputs() -> &'static CaseInsensitiveMap<String> {
    static EMPTY: OnceLock<CaseInsensitiveMap<String>> = OnceLock::new();
    EMPTY.get_or_init(CaseInsensitiveMap::new)
}

/// A group of steps that run concurrently
///
/// Both collections stay absent until first written. An empty collection is
/// never encoded: `steps` and `outputs` are left out of the serialized form
/// entirely rather than written as `[]` / `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelStep {
    #[serde(flatten)]
    pub common: StepCommon,

    #[serde(default, skip_serializing_if = "is_absent_or_empty")]
    steps: Option<Vec<Step>>,

    /// Output name -> value expression
    #[serde(default, skip_serializing_if = "is_absent_or_empty")]
    outputs: Option<CaseInsensitiveMap<String>>,
}

impl ParallelStep {
    /// Create an empty group
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            common: StepCommon::new(id),
            steps: None,
            outputs: None,
        }
    }

    /// Child steps in declaration order (empty until the first append)
    pub fn steps(&self) -> &[Step] {
        self.steps.as_deref().unwrap_or(&[])
    }

    /// Mutable child steps, materialized on first access
    pub fn steps_mut(&mut self) -> &mut Vec<Step> {
        self.steps.get_or_insert_with(Vec::new)
    }

    /// Declared outputs (empty until the first insert)
    pub fn outputs(&self) -> &CaseInsensitiveMap<String> {
        self.outputs.as_ref().unwrap_or_else(|| empty_outputs())
    }

    /// Mutable outputs, materialized on first access
    pub fn outputs_mut(&mut self) -> &mut CaseInsensitiveMap<String> {
        self.outputs.get_or_insert_with(CaseInsensitiveMap::new)
    }

    /// Whether the child collection has been materialized
    pub fn has_steps_collection(&self) -> bool {
        self.steps.is_some()
    }

    /// Whether the outputs collection has been materialized
    pub fn has_outputs_collection(&self) -> bool {
        self.outputs.is_some()
    }

    /// Drop empty collections so they are encoded as absent
    pub fn prepare_for_serialization(&mut self) {
        if let Some(steps) = &mut self.steps {
            for step in steps.iter_mut() {
                step.prepare_for_serialization();
            }
        }
        if self.steps.as_ref().is_some_and(Vec::is_empty) {
            self.steps = None;
        }
        if self.outputs.as_ref().is_some_and(CaseInsensitiveMap::is_empty) {
            self.outputs = None;
        }
    }
}
