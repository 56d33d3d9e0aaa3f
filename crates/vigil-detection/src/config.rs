//! Detector configuration.
//!
//! Configurations are created and updated through the admin surface and
//! read by the registry on every training and detection cycle. Invalid
//! definitions are rejected at admin-operation time, never silently
//! accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_types::Severity;

use crate::error::{DetectionError, DetectionResult};

/// Which detection algorithm a detector routes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorAlgorithm {
    /// Point-anomaly detection from rolling window statistics.
    Statistical,
    /// Seasonal decomposition with residual outlier detection, falling
    /// back to statistical detection until trained.
    SeasonalHybrid,
}

impl std::fmt::Display for DetectorAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorAlgorithm::Statistical => write!(f, "statistical"),
            DetectorAlgorithm::SeasonalHybrid => write!(f, "seasonal_hybrid"),
        }
    }
}

/// Score cut points in `[0, 1]` mapping anomaly scores to severities.
///
/// Bounds are inclusive at the low end: a score exactly at `high` is
/// `Severity::High`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl SeverityThresholds {
    /// Bucket a score against the cut points.
    pub fn bucket(&self, score: f64) -> Severity {
        if score >= self.critical {
            Severity::Critical
        } else if score >= self.high {
            Severity::High
        } else if score >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn validate(&self) -> DetectionResult<()> {
        let ordered = self.low < self.medium && self.medium < self.high && self.high < self.critical;
        let in_range = self.low >= 0.0 && self.critical <= 1.0;
        if !ordered || !in_range {
            return Err(DetectionError::Configuration(format!(
                "severity thresholds must be ordered within [0, 1]: low={} medium={} high={} critical={}",
                self.low, self.medium, self.high, self.critical
            )));
        }
        Ok(())
    }
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.5,
            high: 0.7,
            critical: 0.9,
        }
    }
}

/// Which decomposition components the seasonal detector models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalComponent {
    Trend,
    Seasonal,
    Residual,
}

/// Seasonality settings for `seasonal_hybrid` detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalityConfig {
    pub enabled: bool,
    /// Season length in phase positions (hours for daily seasonality).
    pub period: usize,
    pub components: Vec<SeasonalComponent>,
}

impl Default for SeasonalityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 24,
            components: vec![
                SeasonalComponent::Trend,
                SeasonalComponent::Seasonal,
                SeasonalComponent::Residual,
            ],
        }
    }
}

/// Forecast settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    pub enabled: bool,
    /// Number of future points to project.
    pub horizon: usize,
    /// Minimum backtested confidence required to attach a forecast to an
    /// anomaly. Forecasts below the floor are discarded, never fabricated.
    pub confidence: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            horizon: 12,
            confidence: 0.7,
        }
    }
}

/// Alerting settings for a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorAlerting {
    pub enabled: bool,
    /// Minimum time between two alerts from the same detector.
    pub cooldown: Duration,
    /// Channel names to notify (resolved by the alerting layer).
    pub channels: Vec<String>,
}

impl Default for DetectorAlerting {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: Duration::from_secs(15 * 60),
            channels: Vec::new(),
        }
    }
}

/// Configuration for one named detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Unique detector id.
    pub id: String,
    /// Metric this detector watches.
    pub metric: String,
    pub algorithm: DetectorAlgorithm,
    /// Detection sensitivity multiplier in `(0, 1]`; lower is stricter.
    pub sensitivity: f64,
    /// Minimum training samples before the detector is used for detection.
    pub min_data_points: usize,
    /// How far back training pulls history.
    pub training_window: Duration,
    /// How much recent history detection considers.
    pub detection_window: Duration,
    pub seasonality: SeasonalityConfig,
    pub thresholds: SeverityThresholds,
    pub prediction: PredictionConfig,
    pub alerting: DetectorAlerting,
}

impl DetectorConfig {
    /// A statistical detector with conventional defaults.
    pub fn statistical(id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metric: metric.into(),
            algorithm: DetectorAlgorithm::Statistical,
            sensitivity: 1.0,
            min_data_points: 30,
            training_window: Duration::from_secs(24 * 3600),
            detection_window: Duration::from_secs(3600),
            seasonality: SeasonalityConfig {
                enabled: false,
                ..SeasonalityConfig::default()
            },
            thresholds: SeverityThresholds::default(),
            prediction: PredictionConfig::default(),
            alerting: DetectorAlerting::default(),
        }
    }

    /// A seasonal-hybrid detector with conventional defaults.
    pub fn seasonal_hybrid(id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            algorithm: DetectorAlgorithm::SeasonalHybrid,
            seasonality: SeasonalityConfig::default(),
            training_window: Duration::from_secs(7 * 24 * 3600),
            ..Self::statistical(id, metric)
        }
    }

    /// Validate the configuration. Called at admin-operation time.
    pub fn validate(&self) -> DetectionResult<()> {
        if self.id.is_empty() {
            return Err(DetectionError::Configuration("detector id is empty".into()));
        }
        if self.metric.is_empty() {
            return Err(DetectionError::Configuration(format!(
                "detector {} has no metric",
                self.id
            )));
        }
        if self.sensitivity <= 0.0 || self.sensitivity > 1.0 {
            return Err(DetectionError::Configuration(format!(
                "detector {}: sensitivity {} outside (0, 1]",
                self.id, self.sensitivity
            )));
        }
        if self.algorithm == DetectorAlgorithm::SeasonalHybrid
            && self.seasonality.enabled
            && self.seasonality.period == 0
        {
            return Err(DetectionError::Configuration(format!(
                "detector {}: seasonal period must be positive",
                self.id
            )));
        }
        if self.training_window.is_zero() {
            return Err(DetectionError::Configuration(format!(
                "detector {}: training window must be positive",
                self.id
            )));
        }
        self.thresholds.validate()
    }

    /// Whether replacing `self` with `updated` invalidates trained state.
    ///
    /// Mutating algorithm, sensitivity, or seasonality must trigger a
    /// retrain; threshold or alerting changes apply immediately.
    pub fn requires_retrain(&self, updated: &DetectorConfig) -> bool {
        self.algorithm != updated.algorithm
            || self.sensitivity != updated.sensitivity
            || self.seasonality != updated.seasonality
            || self.metric != updated.metric
            || self.training_window != updated.training_window
    }
}
