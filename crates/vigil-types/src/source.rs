//! Capability traits for pulling metric data from the outside world.
//!
//! The pipeline never owns metric storage. Both the detector registry and
//! the rule engine poll a [`MetricSource`] for current values; training
//! additionally pulls windows from a [`HistoricalMetricSource`]. An
//! unavailable metric is `None`, not an error — a tick simply skips it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::sample::{MetricSample, MetricValue};

/// Synchronous-pull source of current metric values.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// The current value of a metric, or `None` when unavailable.
    async fn current_value(&self, metric: &str) -> Option<MetricValue>;
}

/// Source of historical metric windows, used only for detector training.
#[async_trait]
pub trait HistoricalMetricSource: Send + Sync {
    /// All samples for `metric` in `[start, end)`, oldest first.
    async fn historical_series(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<MetricSample>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedSource {
        values: HashMap<String, MetricValue>,
    }

    #[async_trait]
    impl MetricSource for FixedSource {
        async fn current_value(&self, metric: &str) -> Option<MetricValue> {
            self.values.get(metric).cloned()
        }
    }

    #[tokio::test]
    async fn missing_metric_is_none() {
        let source = FixedSource {
            values: HashMap::from([("up".to_string(), MetricValue::Numeric(1.0))]),
        };
        assert_eq!(source.current_value("up").await, Some(MetricValue::Numeric(1.0)));
        assert_eq!(source.current_value("down").await, None);
    }
}
