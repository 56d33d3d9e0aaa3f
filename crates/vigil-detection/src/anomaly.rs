//! Anomaly records and the bounded per-detector anomaly log.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_types::Severity;

use crate::config::DetectorAlgorithm;
use crate::forecast::Forecast;

/// Unique identifier for an anomaly record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnomalyId(pub Uuid);

impl AnomalyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnomalyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AnomalyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shape of abnormal behavior an anomaly describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyType {
    Point,
    Contextual,
    Collective,
    Trend,
    Seasonal,
}

/// Short-term direction of the series around the anomalous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Up => write!(f, "up"),
            TrendDirection::Down => write!(f, "down"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

/// A detected anomaly. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: AnomalyId,
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub algorithm: DetectorAlgorithm,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    /// Normalized magnitude of how unusual the sample is, in `[0, 1]`.
    pub score: f64,
    /// How certain the detector is, in `[0, 1]`.
    pub confidence: f64,
    pub value: f64,
    pub expected_value: f64,
    pub deviation: f64,
    /// Free-form context for operators (trend direction, vote breakdown).
    pub context: HashMap<String, String>,
    /// Attached only when the forecast clears the configured confidence
    /// floor.
    pub prediction: Option<Forecast>,
    pub recommendations: Vec<String>,
}

/// Filter for anomaly log queries.
#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    pub metric: Option<String>,
    pub min_severity: Option<Severity>,
    pub algorithm: Option<DetectorAlgorithm>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AnomalyFilter {
    pub fn matches(&self, anomaly: &Anomaly) -> bool {
        if let Some(metric) = &self.metric {
            if &anomaly.metric != metric {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if anomaly.severity < min {
                return false;
            }
        }
        if let Some(algorithm) = self.algorithm {
            if anomaly.algorithm != algorithm {
                return false;
            }
        }
        if let Some(from) = self.from {
            if anomaly.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if anomaly.timestamp >= to {
                return false;
            }
        }
        true
    }
}

/// Append-only per-detector anomaly log, capped at a bounded size.
///
/// Oldest entries are evicted first once the cap is reached.
#[derive(Debug, Clone)]
pub struct AnomalyLog {
    entries: VecDeque<Anomaly>,
    capacity: usize,
}

impl AnomalyLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, anomaly: Anomaly) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(anomaly);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anomaly> {
        self.entries.iter()
    }

    /// Entries matching a filter, oldest first.
    pub fn query(&self, filter: &AnomalyFilter) -> Vec<Anomaly> {
        self.entries
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_anomaly(metric: &str, severity: Severity) -> Anomaly {
        Anomaly {
            id: AnomalyId::new(),
            timestamp: Utc::now(),
            metric: metric.into(),
            algorithm: DetectorAlgorithm::Statistical,
            anomaly_type: AnomalyType::Point,
            severity,
            score: 0.8,
            confidence: 0.66,
            value: 10.0,
            expected_value: 5.0,
            deviation: 5.0,
            context: HashMap::new(),
            prediction: None,
            recommendations: vec![],
        }
    }

    #[test]
    fn log_evicts_oldest_first() {
        let mut log = AnomalyLog::new(3);
        for i in 0..5 {
            log.push(make_anomaly(&format!("m{}", i), Severity::Low));
        }
        assert_eq!(log.len(), 3);
        let metrics: Vec<_> = log.iter().map(|a| a.metric.clone()).collect();
        assert_eq!(metrics, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn filter_by_severity_and_metric() {
        let mut log = AnomalyLog::new(10);
        log.push(make_anomaly("cpu", Severity::Low));
        log.push(make_anomaly("cpu", Severity::Critical));
        log.push(make_anomaly("mem", Severity::High));

        let filter = AnomalyFilter {
            metric: Some("cpu".into()),
            min_severity: Some(Severity::High),
            ..AnomalyFilter::default()
        };
        let hits = log.query(&filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].severity, Severity::Critical);
    }

    #[test]
    fn filter_by_time_range() {
        let mut log = AnomalyLog::new(10);
        let mut old = make_anomaly("cpu", Severity::Low);
        old.timestamp = Utc::now() - chrono::Duration::hours(2);
        log.push(old);
        log.push(make_anomaly("cpu", Severity::Low));

        let filter = AnomalyFilter {
            from: Some(Utc::now() - chrono::Duration::hours(1)),
            ..AnomalyFilter::default()
        };
        assert_eq!(log.query(&filter).len(), 1);
    }

    #[test]
    fn anomaly_serde_uses_type_field() {
        let a = make_anomaly("cpu", Severity::Medium);
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"type\":\"point\""));
    }
}
