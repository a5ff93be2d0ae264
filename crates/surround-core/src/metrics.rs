use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A recorded metric: a single sample, or the series of samples once the
/// same name has been recorded more than once.
///
/// A first sample that is already a list starts as a series, so later
/// samples extend it rather than nest it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Two or more samples in recording order.
    Series(Vec<Value>),
    /// The only sample recorded so far.
    Single(Value),
}

impl MetricValue {
    /// Wraps the first sample of a metric.
    pub fn first(value: Value) -> Self {
        match value {
            Value::Array(values) => MetricValue::Series(values),
            other => MetricValue::Single(other),
        }
    }

    /// Appends a sample, promoting a single value to a series.
    pub fn push(&mut self, value: Value) {
        match self {
            MetricValue::Series(values) => values.push(value),
            MetricValue::Single(existing) => {
                let mut values = match existing.take() {
                    Value::Array(values) => values,
                    first => vec![first],
                };
                values.push(value);
                *self = MetricValue::Series(values);
            }
        }
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        match self {
            MetricValue::Series(values) => values.len(),
            MetricValue::Single(_) => 1,
        }
    }

    /// True only for a metric first recorded as an empty list.
    pub fn is_empty(&self) -> bool {
        matches!(self, MetricValue::Series(values) if values.is_empty())
    }

    /// The most recent sample.
    pub fn latest(&self) -> Option<&Value> {
        match self {
            MetricValue::Series(values) => values.last(),
            MetricValue::Single(value) => Some(value),
        }
    }

    /// JSON view of the metric.
    pub fn to_value(&self) -> Value {
        match self {
            MetricValue::Series(values) => Value::Array(values.clone()),
            MetricValue::Single(value) => value.clone(),
        }
    }
}

impl From<Value> for MetricValue {
    fn from(value: Value) -> Self {
        MetricValue::first(value)
    }
}
