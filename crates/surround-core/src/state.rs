//! The record threaded through every stage of a pipeline run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorInfo, SurroundError};
use crate::metrics::MetricValue;

/// Duration of a single executed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Name reported by the stage.
    pub stage: String,
    /// Wall-clock duration in decimal seconds.
    pub duration: String,
}

/// Working data of a pipeline run.
///
/// The accumulators (`errors`, `warnings`, `execution_time`, `stage_metadata`,
/// `metrics`) always exist. User attributes live in a separate map whose set
/// of names is locked between [`State::freeze`] and [`State::thaw`]: existing
/// attributes may change value, new ones are rejected with
/// [`SurroundError::FrozenAttribute`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Errors recorded by stages, in order of occurrence.
    pub errors: Vec<String>,
    /// Non fatal diagnostics recorded by stages.
    pub warnings: Vec<String>,
    /// Per-stage durations in decimal seconds, one entry per executed stage.
    pub execution_time: Vec<String>,
    /// Stage name and duration pairs aligned with `execution_time`.
    pub stage_metadata: Vec<StageRecord>,
    /// Metrics recorded during the run.
    pub metrics: BTreeMap<String, MetricValue>,
    attributes: BTreeMap<String, Value>,
    #[serde(skip)]
    frozen: bool,
}

impl State {
    /// Creates an empty, thawed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute declaration used while constructing input state.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Locks the set of attribute names. Calling it again has no effect.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Unlocks the set of attribute names.
    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    /// Whether the attribute names are currently locked.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Assigns an attribute, creating it when the state is thawed.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SurroundError> {
        match self.attributes.get_mut(name) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None if self.frozen => Err(SurroundError::FrozenAttribute(
                ErrorInfo::new(
                    "surround.state.frozen",
                    format!("cannot create attribute '{name}' on a frozen state"),
                )
                .with_context("attribute", name)
                .with_hint("declare the attribute before the pipeline runs"),
            )),
            None => {
                self.attributes.insert(name.to_string(), value.into());
                Ok(())
            }
        }
    }

    /// Removes an attribute. Fails while frozen since it changes the shape.
    pub fn remove(&mut self, name: &str) -> Result<Option<Value>, SurroundError> {
        if self.frozen && self.attributes.contains_key(name) {
            return Err(SurroundError::FrozenAttribute(
                ErrorInfo::new(
                    "surround.state.frozen",
                    format!("cannot remove attribute '{name}' from a frozen state"),
                )
                .with_context("attribute", name),
            ));
        }
        Ok(self.attributes.remove(name))
    }

    /// Returns the attribute value, if declared.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Mutable access to an existing attribute. Never creates one.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.attributes.get_mut(name)
    }

    /// Returns the attribute as a string slice when it holds a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// Whether the attribute is declared and holds a non-null value.
    pub fn is_set(&self, name: &str) -> bool {
        matches!(self.attributes.get(name), Some(value) if !value.is_null())
    }

    /// Whether the attribute is declared, regardless of its value.
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Names of all user attributes in sorted order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Records a stage error.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Records a warning.
    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Records a metric sample; a repeated name turns the entry into a series.
    pub fn record_metric(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        self.metrics
            .entry(name.into())
            .and_modify(|existing| existing.push(value.clone()))
            .or_insert_with(|| MetricValue::first(value));
    }

    /// Appends a stage duration to both timing accumulators.
    pub fn record_timing(&mut self, stage: impl Into<String>, seconds: f64) {
        let duration = seconds.to_string();
        self.execution_time.push(duration.clone());
        self.stage_metadata.push(StageRecord {
            stage: stage.into(),
            duration,
        });
    }
}
