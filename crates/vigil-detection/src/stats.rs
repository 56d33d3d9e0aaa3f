//! Descriptive statistics over a bounded historical window.
//!
//! Pure computation: given an ordered slice of sample values, produce the
//! summary the detectors work from. An empty window yields `None`, which
//! callers propagate as "not trained" — never as a failure.

use serde::{Deserialize, Serialize};

/// Summary statistics for one training window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
}

impl SeriesStats {
    /// Compute statistics over a window of values.
    ///
    /// Uses population variance and index-based (not interpolated)
    /// quartiles at positions `⌊n·0.25⌋`, `⌊n·0.5⌋`, `⌊n·0.75⌋` on the
    /// sorted values. Returns `None` for an empty window.
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let q1 = sorted[(n as f64 * 0.25) as usize];
        let median = sorted[(n as f64 * 0.5) as usize];
        let q3 = sorted[(n as f64 * 0.75) as usize];

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            min: sorted[0],
            max: sorted[n - 1],
            median,
            q1,
            q3,
            iqr: q3 - q1,
        })
    }
}

/// Median absolute deviation: median of `|xᵢ - median(x)|`.
///
/// Heavy-tail-robust spread estimate used by the modified Z-score rule.
/// `None` for an empty window.
pub fn median_abs_deviation(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = sorted[(sorted.len() as f64 * 0.5) as usize];

    let mut deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    deviations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(deviations[(deviations.len() as f64 * 0.5) as usize])
}
