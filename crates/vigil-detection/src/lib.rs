//! # vigil-detection
//!
//! Statistical and seasonal anomaly detection over metric streams.
//!
//! ## Architecture
//!
//! ```text
//!   HistoricalMetricSource          MetricSource
//!         │ (training cycle)             │ (detection cycle)
//!         ▼                              ▼
//!   ┌──────────────────────────────────────────────┐
//!   │              DetectorRegistry                │
//!   │  DetectorConfig ──► TrainedDetector          │
//!   │      │                  │                    │
//!   │      │   ┌──────────────┴─────────────┐      │
//!   │      │   │ StatisticalDetector        │      │
//!   │      │   │   (Z / IQR / modified-Z)   │      │
//!   │      │   │ SeasonalDetector           │      │
//!   │      │   │   (decompose + residuals,  │      │
//!   │      │   │    statistical fallback)   │      │
//!   │      │   └──────────────┬─────────────┘      │
//!   │      │                  │ + ForecastModel    │
//!   │      ▼                  ▼                    │
//!   │  AnomalyLog (bounded) ◄─ Anomaly             │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! Detectors are trained wholesale on a periodic cycle and consulted on a
//! faster detection cycle; insufficient data always skips, never fails.

#![deny(unsafe_code)]

pub mod anomaly;
pub mod config;
pub mod error;
pub mod forecast;
pub mod registry;
pub mod seasonal;
pub mod statistical;
pub mod stats;

pub use anomaly::{Anomaly, AnomalyFilter, AnomalyId, AnomalyLog, AnomalyType, TrendDirection};
pub use config::{
    DetectorAlerting, DetectorAlgorithm, DetectorConfig, PredictionConfig, SeasonalComponent,
    SeasonalityConfig, SeverityThresholds,
};
pub use error::{DetectionError, DetectionResult};
pub use forecast::{Forecast, ForecastModel};
pub use registry::{
    DetectionOutcome, DetectorRegistry, DetectorState, TrainedDetector,
    DEFAULT_ANOMALY_LOG_CAPACITY,
};
pub use seasonal::{SeasonalDetector, SeasonalModel};
pub use statistical::{StatisticalDetector, TrainedStats};
pub use stats::{median_abs_deviation, SeriesStats};
