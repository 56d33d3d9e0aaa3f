//! Seasonal decomposition and residual outlier detection.
//!
//! A trained [`SeasonalModel`] splits the series into trend, a repeating
//! per-phase seasonal pattern, and residual noise; detection flags samples
//! whose residual is large relative to the residual spread. Until enough
//! history exists to train, detection falls back to the statistical
//! detector on the raw series — automatically, not as a caller choice.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::anomaly::{Anomaly, AnomalyId, AnomalyType};
use crate::config::DetectorConfig;
use crate::statistical::{StatisticalDetector, TrainedStats};

/// Residual threshold in units of residual standard deviation.
///
/// Looser than the 3σ point rule: seasonal adjustment already removes
/// systematic variance.
const RESIDUAL_SIGMA_THRESHOLD: f64 = 2.5;

/// Widest centered moving-average window used for the trend component.
const MAX_TREND_WINDOW: usize = 24;

/// Seasonal decomposition state learned from a training window.
///
/// Rebuilt wholesale on each retrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalModel {
    pub period: usize,
    /// Per-phase seasonal offsets, re-centered to zero mean.
    pub seasonal: Vec<f64>,
    /// Level estimate from the tail of the trend component.
    pub trend_estimate: f64,
    /// Spread of the training residuals (population).
    pub residual_std: f64,
    pub sample_count: usize,
}

impl SeasonalModel {
    /// Decompose a training window into trend, seasonal, and residual
    /// components. Requires at least two full periods of data; returns
    /// `None` otherwise so the caller keeps using the statistical
    /// fallback.
    pub fn fit(values: &[f64], period: usize) -> Option<Self> {
        if period == 0 || values.len() < 2 * period {
            return None;
        }
        let n = values.len();

        // 1. Trend: centered moving average, window = min(24, n/4),
        //    shrinking at the edges.
        let window = (n / 4).min(MAX_TREND_WINDOW).max(1);
        let half = window / 2;
        let trend: Vec<f64> = (0..n)
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(n);
                values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
            })
            .collect();

        // 2. Detrend.
        let detrended: Vec<f64> = values.iter().zip(&trend).map(|(v, t)| v - t).collect();

        // 3. Per-phase seasonal means, re-centered to zero across the
        //    period.
        let mut sums = vec![0.0; period];
        let mut counts = vec![0usize; period];
        for (i, d) in detrended.iter().enumerate() {
            sums[i % period] += d;
            counts[i % period] += 1;
        }
        let mut seasonal: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(s, c)| if *c > 0 { s / *c as f64 } else { 0.0 })
            .collect();
        let seasonal_mean = seasonal.iter().sum::<f64>() / period as f64;
        for s in &mut seasonal {
            *s -= seasonal_mean;
        }

        // 4. Residuals.
        let residuals: Vec<f64> = detrended
            .iter()
            .enumerate()
            .map(|(i, d)| d - seasonal[i % period])
            .collect();
        let residual_mean = residuals.iter().sum::<f64>() / n as f64;
        let residual_var =
            residuals.iter().map(|r| (r - residual_mean).powi(2)).sum::<f64>() / n as f64;

        let trend_tail = &trend[n - window..];
        let trend_estimate = trend_tail.iter().sum::<f64>() / trend_tail.len() as f64;

        Some(Self {
            period,
            seasonal,
            trend_estimate,
            residual_std: residual_var.sqrt(),
            sample_count: n,
        })
    }

    /// Expected value at a phase position.
    pub fn expected_at_phase(&self, phase: usize) -> f64 {
        self.trend_estimate + self.seasonal[phase % self.period]
    }
}

/// Residual outlier detector over a [`SeasonalModel`], with statistical
/// fallback.
pub struct SeasonalDetector;

impl SeasonalDetector {
    /// Evaluate one new sample.
    ///
    /// Routes to the seasonal model when trained; otherwise falls back to
    /// [`StatisticalDetector`] over the raw training window.
    pub fn detect(
        config: &DetectorConfig,
        model: Option<&SeasonalModel>,
        fallback: Option<&TrainedStats>,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Option<Anomaly> {
        match model {
            Some(model) => Self::detect_residual(config, model, timestamp, value),
            None => {
                fallback.and_then(|stats| StatisticalDetector::detect(config, stats, timestamp, value))
            }
        }
    }

    fn detect_residual(
        config: &DetectorConfig,
        model: &SeasonalModel,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Option<Anomaly> {
        let phase = timestamp.hour() as usize % model.period;
        let expected = model.expected_at_phase(phase);
        let residual = value - expected;

        let sigma_ratio = if model.residual_std > f64::EPSILON {
            residual.abs() / model.residual_std
        } else if residual.abs() > f64::EPSILON {
            // A degenerate training fit treats any departure as maximal.
            f64::INFINITY
        } else {
            0.0
        };

        let threshold = RESIDUAL_SIGMA_THRESHOLD / config.sensitivity;
        if sigma_ratio <= threshold {
            return None;
        }

        let score = (sigma_ratio / 5.0).min(1.0);
        let confidence = (sigma_ratio / (threshold * 2.0)).min(1.0);
        let severity = config.thresholds.bucket(score);

        let mut context = HashMap::new();
        context.insert("phase".into(), phase.to_string());
        context.insert("residual".into(), format!("{:.4}", residual));
        context.insert("sigma_ratio".into(), format!("{:.4}", sigma_ratio));

        Some(Anomaly {
            id: AnomalyId::new(),
            timestamp,
            metric: config.metric.clone(),
            algorithm: config.algorithm,
            anomaly_type: AnomalyType::Seasonal,
            severity,
            score,
            confidence,
            value,
            expected_value: expected,
            deviation: residual,
            context,
            prediction: None,
            recommendations: StatisticalDetector::recommendations(severity, expected, residual),
        })
    }
}
