//! Short-horizon trend forecasting with backtested confidence.

use serde::{Deserialize, Serialize};

/// How many trailing samples the trend regression looks at.
const REGRESSION_WINDOW: usize = 20;

/// Backtest pseudo-predictions use this moving-average width.
const BACKTEST_WINDOW: usize = 5;

/// A projected continuation of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Projected future values, nearest first.
    pub values: Vec<f64>,
    /// Backtested confidence in `[0, 1]`.
    pub confidence: f64,
    pub horizon: usize,
}

/// Linear trend extrapolation over the tail of a series.
pub struct ForecastModel;

impl ForecastModel {
    /// Forecast `horizon` future points from the series tail.
    ///
    /// Fits a least-squares slope over the last [`REGRESSION_WINDOW`]
    /// samples and projects `last_value + slope·i`. Returns `None` when the
    /// series is too short to fit a slope.
    pub fn forecast(values: &[f64], horizon: usize) -> Option<Forecast> {
        if values.len() < 2 || horizon == 0 {
            return None;
        }

        let tail_start = values.len().saturating_sub(REGRESSION_WINDOW);
        let tail = &values[tail_start..];
        let slope = Self::slope(tail);
        let last = *values.last()?;

        let projected = (1..=horizon).map(|i| last + slope * i as f64).collect();

        Some(Forecast {
            values: projected,
            confidence: Self::backtest_confidence(values),
            horizon,
        })
    }

    /// Least-squares slope over a window, x = 0..n.
    fn slope(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = values.iter().sum::<f64>() / n;

        let mut num = 0.0;
        let mut den = 0.0;
        for (i, &y) in values.iter().enumerate() {
            let dx = i as f64 - mean_x;
            num += dx * (y - mean_y);
            den += dx * dx;
        }
        if den.abs() < f64::EPSILON {
            0.0
        } else {
            num / den
        }
    }

    /// Backtested confidence estimate.
    ///
    /// For each index ≥ [`BACKTEST_WINDOW`], a moving average of the
    /// preceding window stands in as the "prediction" of that point; the
    /// accumulated mean relative error gives `max(0, 1 - error)`.
    pub fn backtest_confidence(values: &[f64]) -> f64 {
        if values.len() <= BACKTEST_WINDOW {
            return 0.0;
        }

        let mut total_rel_error = 0.0;
        let mut count = 0usize;
        for i in BACKTEST_WINDOW..values.len() {
            let window = &values[i - BACKTEST_WINDOW..i];
            let predicted = window.iter().sum::<f64>() / BACKTEST_WINDOW as f64;
            let actual = values[i];
            let denom = actual.abs().max(f64::EPSILON);
            total_rel_error += (predicted - actual).abs() / denom;
            count += 1;
        }

        let mean_rel_error = total_rel_error / count as f64;
        (1.0 - mean_rel_error).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_short_series_yields_none() {
        assert!(ForecastModel::forecast(&[1.0], 5).is_none());
        assert!(ForecastModel::forecast(&[], 5).is_none());
    }

    #[test]
    fn linear_series_projects_exactly() {
        let values: Vec<f64> = (0..30).map(|i| 10.0 + 2.0 * i as f64).collect();
        let f = ForecastModel::forecast(&values, 3).unwrap();
        // last = 68, slope = 2
        assert_eq!(f.values.len(), 3);
        assert!((f.values[0] - 70.0).abs() < 1e-9);
        assert!((f.values[2] - 74.0).abs() < 1e-9);
    }

    #[test]
    fn flat_series_projects_flat_with_high_confidence() {
        let values = vec![50.0; 40];
        let f = ForecastModel::forecast(&values, 4).unwrap();
        assert!(f.values.iter().all(|v| (v - 50.0).abs() < 1e-9));
        // Moving-average backtest predicts a constant series perfectly
        assert!((f.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn noisy_series_has_lower_confidence_than_stable() {
        let stable = vec![100.0; 40];
        let noisy: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 20.0 } else { 180.0 })
            .collect();
        let c_stable = ForecastModel::backtest_confidence(&stable);
        let c_noisy = ForecastModel::backtest_confidence(&noisy);
        assert!(c_stable > c_noisy);
    }

    #[test]
    fn confidence_never_negative() {
        // Wildly alternating series drives mean relative error over 1
        let values: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 0.001 } else { 1000.0 })
            .collect();
        let c = ForecastModel::backtest_confidence(&values);
        assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn regression_uses_only_the_tail() {
        // Old samples decreasing, last 20 increasing: slope must be positive
        let mut values: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        values.extend((0..20).map(|i| 70.0 + 3.0 * i as f64));
        let f = ForecastModel::forecast(&values, 1).unwrap();
        assert!(f.values[0] > *values.last().unwrap());
    }
}
