//! Service-level configuration for the scheduler loops.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/// Cadence and capacity settings for one [`VigilService`] instance.
///
/// [`VigilService`]: crate::VigilService
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Detector retraining cadence. Hours in production.
    pub training_interval: Duration,
    /// Detection cadence over current metric values. Minutes in production.
    pub detection_interval: Duration,
    /// Rule evaluation cadence. Usually matches detection.
    pub rule_interval: Duration,
    /// Escalation sweep cadence. Finer than the others so timeouts are
    /// honored promptly.
    pub escalation_interval: Duration,
    /// Bound on each per-detector anomaly log.
    pub anomaly_log_capacity: usize,
    /// Buffer size of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            training_interval: Duration::from_secs(60 * 60),
            detection_interval: Duration::from_secs(60),
            rule_interval: Duration::from_secs(60),
            escalation_interval: Duration::from_secs(30),
            anomaly_log_capacity: 500,
            event_capacity: 256,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> ServiceResult<()> {
        let intervals = [
            ("training_interval", self.training_interval),
            ("detection_interval", self.detection_interval),
            ("rule_interval", self.rule_interval),
            ("escalation_interval", self.escalation_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(ServiceError::Configuration(format!(
                    "{name} must be positive"
                )));
            }
        }
        if self.anomaly_log_capacity == 0 {
            return Err(ServiceError::Configuration(
                "anomaly_log_capacity must be positive".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ServiceError::Configuration(
                "event_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = ServiceConfig::default();
        config.escalation_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.event_capacity = 0;
        assert!(config.validate().is_err());
    }
}
