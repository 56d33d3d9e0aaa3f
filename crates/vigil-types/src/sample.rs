//! Metric samples and values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single observation of a metric: the only unit of input to the pipeline.
///
/// Samples are immutable and produced by an external collaborator (the
/// metric store). Detection works on the numeric `value`; rule conditions
/// that need non-numeric metrics go through [`MetricValue`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name, e.g. `"api.error_rate"`.
    pub metric: String,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Observed value.
    pub value: f64,
}

impl MetricSample {
    pub fn new(metric: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            timestamp,
            value,
        }
    }
}

/// A current metric value as seen by rule conditions.
///
/// Metrics are usually numeric, but health-status style metrics report
/// strings (e.g. `"degraded"`). Keeping the two cases in a tagged union
/// lets operator evaluation be exhaustively typed instead of coercing at
/// runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Numeric(f64),
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Numeric(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }

    /// Textual rendering used by string operators and logging.
    pub fn as_text(&self) -> String {
        match self {
            MetricValue::Numeric(v) => v.to_string(),
            MetricValue::Text(s) => s.clone(),
        }
    }

    /// Borrowed view of the value when it is actually text. Numeric
    /// values are not coerced.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Numeric(_) => None,
            MetricValue::Text(s) => Some(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Numeric(v)
    }
}

impl From<&str> for MetricValue {
    fn from(s: &str) -> Self {
        MetricValue::Text(s.to_string())
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Numeric(v) => write!(f, "{}", v),
            MetricValue::Text(s) => write!(f, "{}", s),
        }
    }
}
