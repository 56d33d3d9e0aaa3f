//! Point-anomaly detection from rolling window statistics.
//!
//! Three independent rules vote on each new sample: Z-score, IQR fences,
//! and the MAD-based modified Z-score. Any single vote fires the anomaly;
//! the vote count becomes the confidence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_types::Severity;

use crate::anomaly::{Anomaly, AnomalyId, AnomalyType, TrendDirection};
use crate::config::DetectorConfig;
use crate::stats::{median_abs_deviation, SeriesStats};

/// Z-score cut-off for the first vote.
const Z_SCORE_THRESHOLD: f64 = 3.0;

/// IQR fence multiplier for the second vote.
const IQR_FENCE_FACTOR: f64 = 1.5;

/// Modified Z-score cut-off for the third vote.
const MODIFIED_Z_THRESHOLD: f64 = 3.5;

/// Scale constant relating MAD to the standard deviation of a normal
/// distribution.
const MAD_SCALE: f64 = 0.6745;

/// Band around zero within which the short-term trend reads as stable.
const TREND_STABLE_BAND: f64 = 0.1;

/// Statistics learned from a training window, plus the window itself.
///
/// Rebuilt wholesale on each retrain; never partially mutated. The raw
/// values are retained for the MAD rule, trend direction, and forecasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedStats {
    pub stats: SeriesStats,
    pub mad: f64,
    pub values: Vec<f64>,
}

impl TrainedStats {
    /// Fit statistics over a training window. `None` for an empty window.
    pub fn fit(values: &[f64]) -> Option<Self> {
        let stats = SeriesStats::compute(values)?;
        let mad = median_abs_deviation(values)?;
        Some(Self {
            stats,
            mad,
            values: values.to_vec(),
        })
    }

    pub fn sample_count(&self) -> usize {
        self.values.len()
    }
}

/// Point-anomaly detector over [`TrainedStats`].
pub struct StatisticalDetector;

impl StatisticalDetector {
    /// Evaluate one new sample against trained statistics.
    ///
    /// Returns the anomaly if at least one rule votes. The configured
    /// sensitivity widens the cut-offs when below 1.0.
    pub fn detect(
        config: &DetectorConfig,
        trained: &TrainedStats,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Option<Anomaly> {
        let stats = &trained.stats;
        let sensitivity = config.sensitivity;

        // Vote 1: Z-score. Undefined for a degenerate window.
        let z_score = if stats.std_dev > f64::EPSILON {
            (value - stats.mean).abs() / stats.std_dev
        } else {
            0.0
        };
        let z_vote = z_score > Z_SCORE_THRESHOLD / sensitivity;

        // Vote 2: IQR fences.
        let fence = IQR_FENCE_FACTOR / sensitivity * stats.iqr;
        let iqr_vote = value < stats.q1 - fence || value > stats.q3 + fence;

        // Vote 3: modified Z-score from MAD.
        let modified_z = if trained.mad > f64::EPSILON {
            MAD_SCALE * (value - stats.median) / trained.mad
        } else {
            0.0
        };
        let mz_vote = modified_z.abs() > MODIFIED_Z_THRESHOLD / sensitivity;

        let votes = [z_vote, iqr_vote, mz_vote];
        let votes_true = votes.iter().filter(|v| **v).count();
        if votes_true == 0 {
            return None;
        }

        let score = (z_score / 5.0).max(modified_z.abs() / 5.0).min(1.0);
        let confidence = votes_true as f64 / votes.len() as f64;
        let severity = config.thresholds.bucket(score);

        let expected = stats.mean;
        let deviation = value - expected;
        let trend = Self::trend_direction(&trained.values, value);

        let mut context = HashMap::new();
        context.insert("trend".into(), trend.to_string());
        context.insert("z_score".into(), format!("{:.4}", z_score));
        context.insert("modified_z_score".into(), format!("{:.4}", modified_z));
        context.insert(
            "votes".into(),
            format!("z={} iqr={} modified_z={}", z_vote, iqr_vote, mz_vote),
        );

        Some(Anomaly {
            id: AnomalyId::new(),
            timestamp,
            metric: config.metric.clone(),
            algorithm: config.algorithm,
            anomaly_type: AnomalyType::Point,
            severity,
            score,
            confidence,
            value,
            expected_value: expected,
            deviation,
            context,
            prediction: None,
            recommendations: Self::recommendations(severity, expected, deviation),
        })
    }

    /// Short-term trend from the last 10 retained samples.
    ///
    /// Compares the mean of the most recent 5 samples (including the new
    /// one) to the mean of the preceding 5; ±10% around the older mean
    /// reads as stable.
    pub fn trend_direction(history: &[f64], current: f64) -> TrendDirection {
        let mut window: Vec<f64> = history.to_vec();
        window.push(current);
        if window.len() < 10 {
            return TrendDirection::Stable;
        }
        let tail = &window[window.len() - 10..];
        let older_mean = tail[..5].iter().sum::<f64>() / 5.0;
        let recent_mean = tail[5..].iter().sum::<f64>() / 5.0;

        let denom = older_mean.abs().max(f64::EPSILON);
        let change = (recent_mean - older_mean) / denom;
        if change > TREND_STABLE_BAND {
            TrendDirection::Up
        } else if change < -TREND_STABLE_BAND {
            TrendDirection::Down
        } else {
            TrendDirection::Stable
        }
    }

    /// Deterministic operator guidance from severity and relative deviation.
    pub fn recommendations(severity: Severity, expected: f64, deviation: f64) -> Vec<String> {
        let mut recs = Vec::new();
        match severity {
            Severity::Critical => {
                recs.push("Investigate immediately: score is in the critical band".to_string())
            }
            Severity::High => {
                recs.push("Investigate promptly: sustained deviation is likely".to_string())
            }
            Severity::Medium | Severity::Low => {
                recs.push("Monitor the metric for continued drift".to_string())
            }
        }

        let rel = deviation / expected.abs().max(f64::EPSILON);
        if rel > 0.5 {
            recs.push(format!(
                "Value is {:.0}% above expected; check for upstream load spikes",
                rel * 100.0
            ));
        } else if rel > 0.0 {
            recs.push("Value is moderately above expected; compare against recent changes".into());
        } else if rel < -0.5 {
            recs.push(format!(
                "Value is {:.0}% below expected; check for data gaps or stalled producers",
                rel.abs() * 100.0
            ));
        } else if rel < 0.0 {
            recs.push("Value is moderately below expected; verify collection is healthy".into());
        }
        recs
    }
}
