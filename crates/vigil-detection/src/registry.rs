//! Detector registry: configuration ownership, training and detection
//! cycles, and the per-detector anomaly log.
//!
//! Each named detector moves through `Unconfigured → Training → Ready`.
//! Training wholesale-replaces the trained artifact; detection pulls one
//! current sample per configured metric and routes it to the matching
//! algorithm. Per-detector failures are logged at the entity boundary and
//! never abort sibling detectors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_types::{HistoricalMetricSource, MetricSource, MetricValue};

use crate::anomaly::{Anomaly, AnomalyFilter, AnomalyLog};
use crate::config::{DetectorAlgorithm, DetectorConfig};
use crate::error::{DetectionError, DetectionResult};
use crate::forecast::ForecastModel;
use crate::seasonal::{SeasonalDetector, SeasonalModel};
use crate::statistical::{StatisticalDetector, TrainedStats};

/// Default bound on each per-detector anomaly log.
pub const DEFAULT_ANOMALY_LOG_CAPACITY: usize = 500;

/// Lifecycle state of a named detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorState {
    /// No configuration exists under this id.
    Unconfigured,
    /// Configured but not yet (re)trained.
    Training,
    /// Trained and eligible for detection.
    Ready,
}

/// Trained artifact for one detector. Owned exclusively by the registry
/// and rebuilt wholesale on each retrain.
#[derive(Debug, Clone)]
pub enum TrainedDetector {
    Statistical(TrainedStats),
    Seasonal {
        /// Present once the window covers two full periods.
        model: Option<SeasonalModel>,
        /// Raw-series statistics, used as the automatic fallback.
        fallback: TrainedStats,
    },
}

impl TrainedDetector {
    /// Samples the artifact was trained on.
    pub fn sample_count(&self) -> usize {
        match self {
            TrainedDetector::Statistical(stats) => stats.sample_count(),
            TrainedDetector::Seasonal { fallback, .. } => fallback.sample_count(),
        }
    }

    fn training_values(&self) -> &[f64] {
        match self {
            TrainedDetector::Statistical(stats) => &stats.values,
            TrainedDetector::Seasonal { fallback, .. } => &fallback.values,
        }
    }
}

/// A detection hit plus whether the per-detector cooldown admits an alert.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub detector_id: String,
    pub anomaly: Anomaly,
    /// False when detector alerting is disabled or the cooldown window has
    /// not elapsed. Rate limiting is expected control flow, not a failure.
    pub should_alert: bool,
    /// Channels the detector wants notified when `should_alert` holds.
    pub channels: Vec<String>,
}

/// Owns named detector configurations, trained state, and anomaly logs.
pub struct DetectorRegistry {
    configs: DashMap<String, DetectorConfig>,
    trained: DashMap<String, TrainedDetector>,
    logs: DashMap<String, AnomalyLog>,
    last_alert: DashMap<String, DateTime<Utc>>,
    log_capacity: usize,
}

impl DetectorRegistry {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            configs: DashMap::new(),
            trained: DashMap::new(),
            logs: DashMap::new(),
            last_alert: DashMap::new(),
            log_capacity,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_ANOMALY_LOG_CAPACITY)
    }

    // ── Configuration (admin surface) ───────────────────────────────

    /// Create or update a detector configuration.
    ///
    /// Validation failures are rejected here, never silently accepted.
    /// When an update touches algorithm-affecting fields the trained state
    /// is dropped so the next training cycle rebuilds it; the caller is
    /// not blocked on the retrain.
    pub fn upsert_detector(&self, config: DetectorConfig) -> DetectionResult<()> {
        config.validate()?;
        let id = config.id.clone();

        if let Some(previous) = self.configs.get(&id) {
            if previous.requires_retrain(&config) {
                drop(previous);
                self.trained.remove(&id);
                info!(detector = %id, "detector update invalidates trained state, retrain scheduled");
            }
        }

        self.logs
            .entry(id.clone())
            .or_insert_with(|| AnomalyLog::new(self.log_capacity));
        self.configs.insert(id, config);
        Ok(())
    }

    /// Remove a detector and all derived state.
    pub fn remove_detector(&self, id: &str) -> DetectionResult<()> {
        if self.configs.remove(id).is_none() {
            return Err(DetectionError::DetectorNotFound(id.to_string()));
        }
        self.trained.remove(id);
        self.logs.remove(id);
        self.last_alert.remove(id);
        Ok(())
    }

    pub fn get_detector(&self, id: &str) -> Option<DetectorConfig> {
        self.configs.get(id).map(|c| c.clone())
    }

    pub fn detectors(&self) -> Vec<DetectorConfig> {
        self.configs.iter().map(|e| e.value().clone()).collect()
    }

    /// Lifecycle state of a detector.
    pub fn state(&self, id: &str) -> DetectorState {
        if !self.configs.contains_key(id) {
            DetectorState::Unconfigured
        } else if self.trained.contains_key(id) {
            DetectorState::Ready
        } else {
            DetectorState::Training
        }
    }

    // ── Training cycle ──────────────────────────────────────────────

    /// Train one detector from its historical window ending at `now`.
    ///
    /// An insufficient window is logged and skipped, leaving any previous
    /// trained state in place; it is not an error.
    pub async fn train_detector(
        &self,
        id: &str,
        history: &dyn HistoricalMetricSource,
        now: DateTime<Utc>,
    ) -> DetectionResult<()> {
        let config = self
            .configs
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| DetectionError::DetectorNotFound(id.to_string()))?;

        let window = chrono::Duration::from_std(config.training_window)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let series = history
            .historical_series(&config.metric, now - window, now)
            .await;
        let values: Vec<f64> = series.iter().map(|s| s.value).collect();

        if values.len() < config.min_data_points {
            debug!(
                detector = %id,
                got = values.len(),
                need = config.min_data_points,
                "insufficient training data, skipping retrain"
            );
            return Ok(());
        }

        let artifact = match config.algorithm {
            DetectorAlgorithm::Statistical => TrainedStats::fit(&values).map(TrainedDetector::Statistical),
            DetectorAlgorithm::SeasonalHybrid => {
                let model = if config.seasonality.enabled {
                    SeasonalModel::fit(&values, config.seasonality.period)
                } else {
                    None
                };
                TrainedStats::fit(&values).map(|fallback| TrainedDetector::Seasonal { model, fallback })
            }
        };

        match artifact {
            Some(artifact) => {
                debug!(detector = %id, samples = artifact.sample_count(), "detector trained");
                self.trained.insert(id.to_string(), artifact);
            }
            None => {
                debug!(detector = %id, "empty training window, skipping retrain");
            }
        }
        Ok(())
    }

    /// Train every configured detector. Per-detector failures are logged
    /// and never abort the cycle for siblings.
    pub async fn train_all(&self, history: &dyn HistoricalMetricSource, now: DateTime<Utc>) {
        let ids: Vec<String> = self.configs.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.train_detector(&id, history, now).await {
                warn!(detector = %id, error = %e, "training failed");
            }
        }
    }

    // ── Detection cycle ─────────────────────────────────────────────

    /// Run detection for one detector against the current metric value.
    ///
    /// Skips (returns `Ok(None)`) when the metric has no current value,
    /// the detector is untrained, or the trained artifact has fewer than
    /// `min_data_points` samples.
    pub async fn detect_detector(
        &self,
        id: &str,
        source: &dyn MetricSource,
        now: DateTime<Utc>,
    ) -> DetectionResult<Option<DetectionOutcome>> {
        let config = self
            .configs
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| DetectionError::DetectorNotFound(id.to_string()))?;

        let value = match source.current_value(&config.metric).await {
            Some(MetricValue::Numeric(v)) => v,
            Some(MetricValue::Text(text)) => {
                return Err(DetectionError::Evaluation {
                    metric: config.metric.clone(),
                    detail: format!("non-numeric value {:?} cannot be scored", text),
                });
            }
            None => {
                debug!(detector = %id, metric = %config.metric, "no current value, skipping tick");
                return Ok(None);
            }
        };

        let trained = match self.trained.get(id) {
            Some(t) => t,
            None => {
                debug!(detector = %id, "not trained yet, skipping tick");
                return Ok(None);
            }
        };
        if trained.sample_count() < config.min_data_points {
            debug!(detector = %id, "below min_data_points, skipping tick");
            return Ok(None);
        }

        let anomaly = match (&config.algorithm, trained.value()) {
            (DetectorAlgorithm::Statistical, TrainedDetector::Statistical(stats)) => {
                StatisticalDetector::detect(&config, stats, now, value)
            }
            (DetectorAlgorithm::SeasonalHybrid, TrainedDetector::Seasonal { model, fallback }) => {
                SeasonalDetector::detect(&config, model.as_ref(), Some(fallback), now, value)
            }
            // Stale artifact from before an algorithm switch: fall back to
            // the raw-series rules until the retrain lands.
            (_, artifact) => {
                let stats = match artifact {
                    TrainedDetector::Statistical(stats) => stats,
                    TrainedDetector::Seasonal { fallback, .. } => fallback,
                };
                StatisticalDetector::detect(&config, stats, now, value)
            }
        };

        let Some(mut anomaly) = anomaly else {
            return Ok(None);
        };

        if config.prediction.enabled {
            let mut values = trained.value().training_values().to_vec();
            values.push(value);
            if let Some(forecast) = ForecastModel::forecast(&values, config.prediction.horizon) {
                // Never fabricate a low-confidence forecast.
                if forecast.confidence >= config.prediction.confidence {
                    anomaly.prediction = Some(forecast);
                }
            }
        }
        drop(trained);

        if let Some(mut log) = self.logs.get_mut(id) {
            log.push(anomaly.clone());
        }

        let should_alert = config.alerting.enabled
            && self.alert_gate(id, config.alerting.cooldown, now);

        Ok(Some(DetectionOutcome {
            detector_id: id.to_string(),
            anomaly,
            should_alert,
            channels: config.alerting.channels.clone(),
        }))
    }

    /// Run detection for every configured detector. Per-detector errors
    /// are logged and skipped.
    pub async fn detect_all(
        &self,
        source: &dyn MetricSource,
        now: DateTime<Utc>,
    ) -> Vec<DetectionOutcome> {
        let ids: Vec<String> = self.configs.iter().map(|e| e.key().clone()).collect();
        let mut outcomes = Vec::new();
        for id in ids {
            match self.detect_detector(&id, source, now).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => warn!(detector = %id, error = %e, "detection failed"),
            }
        }
        outcomes
    }

    /// Per-detector cooldown: admits at most one alert per cooldown
    /// window. Check and timestamp update are atomic per detector.
    fn alert_gate(&self, id: &str, cooldown: Duration, now: DateTime<Utc>) -> bool {
        let cooldown =
            chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());
        match self.last_alert.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.signed_duration_since(*entry.get()) >= cooldown {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Anomalies across all detectors matching a filter, oldest first.
    pub fn anomalies(&self, filter: &AnomalyFilter) -> Vec<Anomaly> {
        let mut hits: Vec<Anomaly> = self
            .logs
            .iter()
            .flat_map(|log| log.value().query(filter))
            .collect();
        hits.sort_by_key(|a| a.timestamp);
        hits
    }

    /// Anomaly log length for one detector.
    pub fn anomaly_count(&self, id: &str) -> usize {
        self.logs.get(id).map(|l| l.len()).unwrap_or(0)
    }

    /// Lifecycle state of every configured detector.
    pub fn states(&self) -> Vec<(String, DetectorState)> {
        self.configs
            .iter()
            .map(|e| (e.key().clone(), self.state(e.key())))
            .collect()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
