//! Alerts, their lifecycle, and per-alert notification records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_types::Severity;

use crate::error::{AlertingError, AlertingResult};
use crate::notify::Channel;

/// Unique identifier for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(pub Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an alert.
///
/// Valid transitions: `open → acknowledged`, `open → resolved`,
/// `open → suppressed`, `acknowledged → resolved`. Only open alerts are
/// escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
    Suppressed,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Open => write!(f, "open"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
            AlertStatus::Suppressed => write!(f, "suppressed"),
        }
    }
}

/// Delivery state of one notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Delivered,
}

/// One notification attempt on one channel. Append-only per alert; one
/// record per channel per escalation transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub channel: Channel,
    pub recipients: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub escalation_level: u32,
    /// Incremented by callers re-invoking dispatch; this layer never
    /// retries on its own.
    pub retry_count: u32,
}

impl Notification {
    /// A successful delivery attempt.
    pub fn sent(
        channel: Channel,
        recipients: Vec<String>,
        escalation_level: u32,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            channel,
            recipients,
            sent_at,
            status: NotificationStatus::Sent,
            error: None,
            escalation_level,
            retry_count: 0,
        }
    }

    /// A failed delivery attempt.
    pub fn failed(
        channel: Channel,
        recipients: Vec<String>,
        escalation_level: u32,
        sent_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            channel,
            recipients,
            sent_at,
            status: NotificationStatus::Failed,
            error: Some(error.into()),
            escalation_level,
            retry_count: 0,
        }
    }
}

/// An alert raised by a firing rule condition.
///
/// Created only by the rule engine; operators may request status
/// transitions; the escalation scheduler alone mutates
/// `escalation_level`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub rule_id: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub timestamp: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub escalation_level: u32,
    pub suppressed_until: Option<DateTime<Utc>>,
    pub suppression_reason: Option<String>,
    pub notifications: Vec<Notification>,
    pub context: HashMap<String, String>,
}

impl Alert {
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        timestamp: DateTime<Utc>,
        context: HashMap<String, String>,
    ) -> Self {
        Self {
            id: AlertId::new(),
            rule_id: rule_id.into(),
            severity,
            status: AlertStatus::Open,
            timestamp,
            resolved_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            escalation_level: 0,
            suppressed_until: None,
            suppression_reason: None,
            notifications: Vec::new(),
            context,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == AlertStatus::Open
    }

    /// Operator acknowledgment. Valid only from `open`.
    pub fn acknowledge(&mut self, by: impl Into<String>, now: DateTime<Utc>) -> AlertingResult<()> {
        if self.status != AlertStatus::Open {
            return Err(AlertingError::InvalidTransition {
                from: self.status.to_string(),
                action: "acknowledge".into(),
            });
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_at = Some(now);
        self.acknowledged_by = Some(by.into());
        Ok(())
    }

    /// Operator resolution. Valid from `open` or `acknowledged`.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> AlertingResult<()> {
        if !matches!(self.status, AlertStatus::Open | AlertStatus::Acknowledged) {
            return Err(AlertingError::InvalidTransition {
                from: self.status.to_string(),
                action: "resolve".into(),
            });
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        Ok(())
    }

    /// Operator suppression for a bounded window. Valid only from `open`.
    pub fn suppress(
        &mut self,
        duration_minutes: i64,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> AlertingResult<()> {
        if self.status != AlertStatus::Open {
            return Err(AlertingError::InvalidTransition {
                from: self.status.to_string(),
                action: "suppress".into(),
            });
        }
        self.status = AlertStatus::Suppressed;
        self.suppressed_until = Some(now + chrono::Duration::minutes(duration_minutes));
        self.suppression_reason = Some(reason.into());
        Ok(())
    }

    /// Timestamp of the most recent notification at a given escalation
    /// level, if any.
    pub fn latest_notification_at_level(&self, level: u32) -> Option<DateTime<Utc>> {
        self.notifications
            .iter()
            .filter(|n| n.escalation_level == level)
            .map(|n| n.sent_at)
            .max()
    }

    /// How many notification transitions were recorded at a level on a
    /// specific channel set (used for terminal-level repeat bookkeeping).
    pub fn notification_rounds_at_level(&self, level: u32) -> usize {
        let mut timestamps: Vec<DateTime<Utc>> = self
            .notifications
            .iter()
            .filter(|n| n.escalation_level == level)
            .map(|n| n.sent_at)
            .collect();
        timestamps.sort();
        timestamps.dedup();
        timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_alert() -> Alert {
        Alert::new("rule-1", Severity::High, Utc::now(), HashMap::new())
    }

    #[test]
    fn new_alert_is_open_at_level_zero() {
        let a = open_alert();
        assert_eq!(a.status, AlertStatus::Open);
        assert_eq!(a.escalation_level, 0);
        assert!(a.notifications.is_empty());
    }

    #[test]
    fn acknowledge_then_resolve() {
        let mut a = open_alert();
        a.acknowledge("oncall@example.com", Utc::now()).unwrap();
        assert_eq!(a.status, AlertStatus::Acknowledged);
        assert_eq!(a.acknowledged_by.as_deref(), Some("oncall@example.com"));

        a.resolve(Utc::now()).unwrap();
        assert_eq!(a.status, AlertStatus::Resolved);
        assert!(a.resolved_at.is_some());
    }

    #[test]
    fn double_acknowledge_is_invalid() {
        let mut a = open_alert();
        a.acknowledge("x", Utc::now()).unwrap();
        assert!(matches!(
            a.acknowledge("y", Utc::now()),
            Err(AlertingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn resolved_alert_rejects_suppress() {
        let mut a = open_alert();
        a.resolve(Utc::now()).unwrap();
        assert!(a.suppress(30, "maintenance", Utc::now()).is_err());
    }

    #[test]
    fn suppress_sets_window() {
        let mut a = open_alert();
        let now = Utc::now();
        a.suppress(45, "deploy in progress", now).unwrap();
        assert_eq!(a.status, AlertStatus::Suppressed);
        assert_eq!(a.suppressed_until, Some(now + chrono::Duration::minutes(45)));
    }

    #[test]
    fn latest_notification_per_level() {
        let mut a = open_alert();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);
        a.notifications
            .push(Notification::sent(Channel::Email, vec![], 1, t0));
        a.notifications
            .push(Notification::sent(Channel::Pager, vec![], 1, t1));
        a.notifications
            .push(Notification::sent(Channel::Email, vec![], 2, t0));

        assert_eq!(a.latest_notification_at_level(1), Some(t1));
        assert_eq!(a.latest_notification_at_level(3), None);
        assert_eq!(a.notification_rounds_at_level(1), 2);
    }
}
