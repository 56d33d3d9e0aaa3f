//! Broadcast events emitted by the service loops and admin surface.

use serde::{Deserialize, Serialize};
use vigil_alerting::AlertId;
use vigil_detection::Anomaly;
use vigil_types::Severity;

/// Observable pipeline events. Delivered best-effort over a
/// `tokio::sync::broadcast` channel; slow subscribers may miss events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VigilEvent {
    AnomalyDetected {
        detector_id: String,
        anomaly: Anomaly,
    },
    AlertRaised {
        alert_id: AlertId,
        rule_id: String,
        severity: Severity,
    },
    AlertEscalated {
        alert_id: AlertId,
        rule_id: String,
        level: u32,
        repeated: bool,
    },
    AlertAcknowledged {
        alert_id: AlertId,
        by: String,
    },
    AlertResolved {
        alert_id: AlertId,
    },
    AlertSuppressed {
        alert_id: AlertId,
        duration_minutes: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_by_kind() {
        let event = VigilEvent::AlertResolved {
            alert_id: AlertId::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"alert_resolved\""));
    }
}
