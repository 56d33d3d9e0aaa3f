//! In-memory alert store shared by the rule engine, the escalation
//! scheduler, and the admin surface.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use vigil_types::Severity;

use crate::alert::{Alert, AlertId, AlertStatus};
use crate::error::{AlertingError, AlertingResult};

/// Query filter for listing alerts. All present fields must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub min_severity: Option<Severity>,
    pub rule_id: Option<String>,
    /// Matches the `category` the originating rule stamped into the
    /// alert context.
    pub category: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        if let Some(status) = self.status {
            if alert.status != status {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if alert.severity < min {
                return false;
            }
        }
        if let Some(rule_id) = &self.rule_id {
            if &alert.rule_id != rule_id {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if alert.context.get("category") != Some(category) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if alert.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Concurrent alert store keyed by alert id.
#[derive(Default)]
pub struct AlertStore {
    alerts: DashMap<AlertId, Alert>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
        }
    }

    pub fn insert(&self, alert: Alert) -> AlertId {
        let id = alert.id;
        self.alerts.insert(id, alert);
        id
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        self.alerts.get(&id).map(|a| a.clone())
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Apply a mutation to one alert under its shard lock.
    pub fn update<T>(
        &self,
        id: AlertId,
        f: impl FnOnce(&mut Alert) -> AlertingResult<T>,
    ) -> AlertingResult<T> {
        let mut entry = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| AlertingError::AlertNotFound(id.to_string()))?;
        f(entry.value_mut())
    }

    pub fn acknowledge(
        &self,
        id: AlertId,
        by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> AlertingResult<()> {
        let by = by.into();
        self.update(id, |a| a.acknowledge(by, now))?;
        info!(alert_id = %id, "alert acknowledged");
        Ok(())
    }

    pub fn resolve(&self, id: AlertId, now: DateTime<Utc>) -> AlertingResult<()> {
        self.update(id, |a| a.resolve(now))?;
        info!(alert_id = %id, "alert resolved");
        Ok(())
    }

    pub fn suppress(
        &self,
        id: AlertId,
        duration_minutes: i64,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> AlertingResult<()> {
        let reason = reason.into();
        self.update(id, |a| a.suppress(duration_minutes, reason, now))?;
        info!(alert_id = %id, minutes = duration_minutes, "alert suppressed");
        Ok(())
    }

    /// Alerts matching a filter, newest first.
    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut out: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    /// How many alerts a rule created at or after `since`, regardless of
    /// their current status. Backs the per-rule hourly alert cap.
    pub fn alerts_created_since(&self, rule_id: &str, since: DateTime<Utc>) -> usize {
        self.alerts
            .iter()
            .filter(|e| e.value().rule_id == rule_id && e.value().timestamp >= since)
            .count()
    }

    /// Reopen suppressed alerts whose window has elapsed. Returns the ids
    /// that were reopened.
    pub fn expire_suppressions(&self, now: DateTime<Utc>) -> Vec<AlertId> {
        let mut reopened = Vec::new();
        for mut entry in self.alerts.iter_mut() {
            let alert = entry.value_mut();
            if alert.status == AlertStatus::Suppressed {
                if let Some(until) = alert.suppressed_until {
                    if now >= until {
                        alert.status = AlertStatus::Open;
                        alert.suppressed_until = None;
                        alert.suppression_reason = None;
                        reopened.push(alert.id);
                    }
                }
            }
        }
        for id in &reopened {
            info!(alert_id = %id, "suppression expired, alert reopened");
        }
        reopened
    }
}
