//! Escalation policies and the scheduler that advances unacknowledged
//! alerts through them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alert::{AlertId, AlertStatus};
use crate::error::{AlertingError, AlertingResult};
use crate::notify::{Channel, NotificationDispatcher};
use crate::rule::AlertRule;
use crate::store::{AlertFilter, AlertStore};

/// One rung of an escalation ladder. Levels are numbered from 1; level 0
/// is the base notification sent when the alert is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub level: u32,
    /// How long an alert may sit at this level before advancing to the
    /// next one.
    pub timeout_secs: u32,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub recipients: Vec<String>,
    /// When this is the terminal level, re-notify on this cadence.
    #[serde(default)]
    pub repeat_interval_secs: Option<u32>,
    /// Cap on terminal-level re-notifications.
    #[serde(default)]
    pub max_repeats: Option<u32>,
}

/// Escalation ladder attached to a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// How long an open alert may sit at level 0 before the first
    /// escalation.
    pub initial_timeout_secs: u32,
    /// Highest level an alert may reach.
    pub max_escalations: u32,
    pub levels: Vec<EscalationLevel>,
}

impl EscalationPolicy {
    /// The configuration for level `n` (1-indexed).
    pub fn level(&self, n: u32) -> Option<&EscalationLevel> {
        if n == 0 {
            return None;
        }
        self.levels.get((n - 1) as usize)
    }

    pub fn validate(&self) -> AlertingResult<()> {
        if self.levels.is_empty() {
            return Err(AlertingError::Configuration(
                "escalation policy needs at least one level".into(),
            ));
        }
        if self.initial_timeout_secs == 0 {
            return Err(AlertingError::Configuration(
                "escalation initial timeout must be positive".into(),
            ));
        }
        if self.max_escalations == 0 || self.max_escalations as usize > self.levels.len() {
            return Err(AlertingError::Configuration(format!(
                "max_escalations must be between 1 and {}",
                self.levels.len()
            )));
        }
        for (i, level) in self.levels.iter().enumerate() {
            if level.level != (i + 1) as u32 {
                return Err(AlertingError::Configuration(format!(
                    "escalation levels must be numbered sequentially from 1, found {} at position {}",
                    level.level, i
                )));
            }
            if level.channels.is_empty() {
                return Err(AlertingError::Configuration(format!(
                    "escalation level {} has no channels",
                    level.level
                )));
            }
            if level.timeout_secs == 0 {
                return Err(AlertingError::Configuration(format!(
                    "escalation level {} timeout must be positive",
                    level.level
                )));
            }
            if level.repeat_interval_secs == Some(0) {
                return Err(AlertingError::Configuration(format!(
                    "escalation level {} repeat interval must be positive",
                    level.level
                )));
            }
            if level.max_repeats.is_some() && level.repeat_interval_secs.is_none() {
                return Err(AlertingError::Configuration(format!(
                    "escalation level {} sets max_repeats without a repeat interval",
                    level.level
                )));
            }
        }
        Ok(())
    }
}

/// One escalation decision taken by a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationAction {
    pub alert_id: AlertId,
    pub rule_id: String,
    pub level: u32,
    /// True for a terminal-level re-notification, false for an advance.
    pub repeated: bool,
}

enum Due {
    Advance { target: u32 },
    Repeat { level: u32 },
}

/// Walks open alerts on each tick and advances any that have sat
/// unacknowledged past their current level's timeout.
///
/// Escalation level only moves forward, one level per tick at most, and
/// only while the alert is open. Notifications are sent outside the store
/// lock; the level advance re-checks status and level before committing,
/// so an acknowledgment racing a tick wins.
pub struct EscalationScheduler {
    rules: Arc<DashMap<String, AlertRule>>,
    store: Arc<AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl EscalationScheduler {
    pub fn new(
        rules: Arc<DashMap<String, AlertRule>>,
        store: Arc<AlertStore>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            rules,
            store,
            dispatcher,
        }
    }

    /// Examine every open alert once. Returns the actions taken.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<EscalationAction> {
        self.store.expire_suppressions(now);

        let open = self.store.alerts(&AlertFilter {
            status: Some(AlertStatus::Open),
            ..Default::default()
        });

        let mut actions = Vec::new();
        for alert in open {
            let policy = match self.rules.get(&alert.rule_id) {
                Some(rule) => match &rule.escalation {
                    Some(policy) => policy.clone(),
                    None => continue,
                },
                None => {
                    debug!(alert_id = %alert.id, rule_id = %alert.rule_id, "rule gone, skipping escalation");
                    continue;
                }
            };

            let current = alert.escalation_level;
            let due = self.what_is_due(&alert, &policy, now);
            let Some(due) = due else { continue };

            match due {
                Due::Advance { target } => {
                    let Some(level) = policy.level(target) else { continue };
                    let records = self
                        .dispatcher
                        .dispatch(&alert, &level.channels, &level.recipients, target, now)
                        .await;
                    let committed = self
                        .store
                        .update(alert.id, |a| {
                            if a.status != AlertStatus::Open || a.escalation_level != current {
                                return Ok(false);
                            }
                            a.escalation_level = target;
                            a.notifications.extend(records);
                            Ok(true)
                        })
                        .unwrap_or(false);
                    if committed {
                        info!(
                            alert_id = %alert.id,
                            rule_id = %alert.rule_id,
                            level = target,
                            "alert escalated"
                        );
                        actions.push(EscalationAction {
                            alert_id: alert.id,
                            rule_id: alert.rule_id.clone(),
                            level: target,
                            repeated: false,
                        });
                    }
                }
                Due::Repeat { level: n } => {
                    let Some(level) = policy.level(n) else { continue };
                    let records = self
                        .dispatcher
                        .dispatch(&alert, &level.channels, &level.recipients, n, now)
                        .await;
                    let committed = self
                        .store
                        .update(alert.id, |a| {
                            if a.status != AlertStatus::Open || a.escalation_level != n {
                                return Ok(false);
                            }
                            a.notifications.extend(records);
                            Ok(true)
                        })
                        .unwrap_or(false);
                    if committed {
                        info!(
                            alert_id = %alert.id,
                            rule_id = %alert.rule_id,
                            level = n,
                            "terminal escalation level re-notified"
                        );
                        actions.push(EscalationAction {
                            alert_id: alert.id,
                            rule_id: alert.rule_id.clone(),
                            level: n,
                            repeated: true,
                        });
                    }
                }
            }
        }
        actions
    }

    fn what_is_due(
        &self,
        alert: &crate::alert::Alert,
        policy: &EscalationPolicy,
        now: DateTime<Utc>,
    ) -> Option<Due> {
        let current = alert.escalation_level;
        if current == 0 {
            if policy.max_escalations < 1 {
                return None;
            }
            let due_at = alert.timestamp + Duration::seconds(policy.initial_timeout_secs as i64);
            return (now >= due_at).then_some(Due::Advance { target: 1 });
        }

        let level = policy.level(current)?;
        // Timers restart from the most recent notification at this level;
        // alert creation time is the floor if none was recorded.
        let anchor = alert
            .latest_notification_at_level(current)
            .unwrap_or(alert.timestamp);

        let next = current + 1;
        let has_next = next <= policy.max_escalations && policy.level(next).is_some();
        if has_next {
            let due_at = anchor + Duration::seconds(level.timeout_secs as i64);
            return (now >= due_at).then_some(Due::Advance { target: next });
        }

        // Terminal level: optional bounded re-notification.
        let interval = level.repeat_interval_secs?;
        let rounds = alert.notification_rounds_at_level(current);
        if let Some(max) = level.max_repeats {
            // The first round at this level is the escalation itself.
            if rounds.saturating_sub(1) >= max as usize {
                return None;
            }
        }
        let due_at = anchor + Duration::seconds(interval as i64);
        (now >= due_at).then_some(Due::Repeat { level: current })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Alert;
    use crate::notify::LogProvider;
    use crate::rule::ConditionOperator;
    use std::collections::HashMap;
    use vigil_types::{MetricValue, Severity};

    fn policy() -> EscalationPolicy {
        EscalationPolicy {
            initial_timeout_secs: 300,
            max_escalations: 2,
            levels: vec![
                EscalationLevel {
                    level: 1,
                    timeout_secs: 600,
                    channels: vec![Channel::Email],
                    recipients: vec!["team@example.com".into()],
                    repeat_interval_secs: None,
                    max_repeats: None,
                },
                EscalationLevel {
                    level: 2,
                    timeout_secs: 600,
                    channels: vec![Channel::Pager],
                    recipients: vec!["oncall@example.com".into()],
                    repeat_interval_secs: Some(900),
                    max_repeats: Some(2),
                },
            ],
        }
    }

    fn scheduler_with_rule(
        policy: Option<EscalationPolicy>,
    ) -> (EscalationScheduler, Arc<AlertStore>) {
        let mut rule = AlertRule::new(
            "cpu-high",
            "cpu_usage",
            ConditionOperator::Gt,
            MetricValue::Numeric(90.0),
            Severity::High,
        );
        rule.escalation = policy;

        let rules = Arc::new(DashMap::new());
        rules.insert(rule.id.clone(), rule);

        let store = Arc::new(AlertStore::new());
        let dispatcher = Arc::new(NotificationDispatcher::new());
        dispatcher.register_provider(Arc::new(LogProvider::new(Channel::Email)));
        dispatcher.register_provider(Arc::new(LogProvider::new(Channel::Pager)));

        (
            EscalationScheduler::new(rules, Arc::clone(&store), dispatcher),
            store,
        )
    }

    fn open_alert(store: &AlertStore, at: DateTime<Utc>) -> AlertId {
        store.insert(Alert::new("cpu-high", Severity::High, at, HashMap::new()))
    }

    #[test]
    fn policy_validation() {
        assert!(policy().validate().is_ok());

        let mut p = policy();
        p.levels.clear();
        assert!(p.validate().is_err());

        let mut p = policy();
        p.max_escalations = 3;
        assert!(p.validate().is_err());

        let mut p = policy();
        p.levels[1].level = 5;
        assert!(p.validate().is_err());

        let mut p = policy();
        p.levels[0].channels.clear();
        assert!(p.validate().is_err());

        let mut p = policy();
        p.levels[1].max_repeats = Some(3);
        p.levels[1].repeat_interval_secs = None;
        assert!(p.validate().is_err());
    }

    #[tokio::test]
    async fn escalates_after_initial_timeout_only() {
        let (scheduler, store) = scheduler_with_rule(Some(policy()));
        let t0 = Utc::now();
        let id = open_alert(&store, t0);

        let actions = scheduler.tick(t0 + Duration::seconds(299)).await;
        assert!(actions.is_empty());
        assert_eq!(store.get(id).unwrap().escalation_level, 0);

        let actions = scheduler.tick(t0 + Duration::seconds(300)).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].level, 1);
        assert!(!actions[0].repeated);

        let alert = store.get(id).unwrap();
        assert_eq!(alert.escalation_level, 1);
        assert_eq!(alert.notification_rounds_at_level(1), 1);
        assert_eq!(alert.notifications[0].channel, Channel::Email);
    }

    #[tokio::test]
    async fn one_level_per_tick_and_bounded_by_max() {
        let (scheduler, store) = scheduler_with_rule(Some(policy()));
        let t0 = Utc::now();
        let id = open_alert(&store, t0);

        // Far past every timeout; still advances one level at a time.
        let far = t0 + Duration::hours(6);
        scheduler.tick(far).await;
        assert_eq!(store.get(id).unwrap().escalation_level, 1);

        scheduler.tick(far + Duration::seconds(600)).await;
        assert_eq!(store.get(id).unwrap().escalation_level, 2);

        // Level 2 is the cap; repeats do not advance the level.
        scheduler.tick(far + Duration::hours(6)).await;
        assert_eq!(store.get(id).unwrap().escalation_level, 2);
    }

    #[tokio::test]
    async fn level_timer_runs_from_latest_notification() {
        let (scheduler, store) = scheduler_with_rule(Some(policy()));
        let t0 = Utc::now();
        let id = open_alert(&store, t0);

        let t1 = t0 + Duration::seconds(300);
        scheduler.tick(t1).await;
        assert_eq!(store.get(id).unwrap().escalation_level, 1);

        // Level 1 timeout is 600s from the level-1 notification, not from
        // alert creation.
        let actions = scheduler.tick(t1 + Duration::seconds(599)).await;
        assert!(actions.is_empty());
        let actions = scheduler.tick(t1 + Duration::seconds(600)).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].level, 2);
    }

    #[tokio::test]
    async fn acknowledged_alert_never_escalates() {
        let (scheduler, store) = scheduler_with_rule(Some(policy()));
        let t0 = Utc::now();
        let id = open_alert(&store, t0);
        store.acknowledge(id, "oncall", t0).unwrap();

        let actions = scheduler.tick(t0 + Duration::hours(12)).await;
        assert!(actions.is_empty());
        assert_eq!(store.get(id).unwrap().escalation_level, 0);
    }

    #[tokio::test]
    async fn terminal_level_repeats_are_bounded() {
        let (scheduler, store) = scheduler_with_rule(Some(policy()));
        let t0 = Utc::now();
        let id = open_alert(&store, t0);

        let t1 = t0 + Duration::seconds(300);
        scheduler.tick(t1).await; // level 1
        let t2 = t1 + Duration::seconds(600);
        scheduler.tick(t2).await; // level 2, terminal

        // Repeat every 900s, at most twice.
        let r1 = scheduler.tick(t2 + Duration::seconds(900)).await;
        assert_eq!(r1.len(), 1);
        assert!(r1[0].repeated);
        assert_eq!(r1[0].level, 2);

        let r2 = scheduler.tick(t2 + Duration::seconds(1800)).await;
        assert_eq!(r2.len(), 1);

        let r3 = scheduler.tick(t2 + Duration::seconds(2700)).await;
        assert!(r3.is_empty());

        let alert = store.get(id).unwrap();
        assert_eq!(alert.escalation_level, 2);
        assert_eq!(alert.notification_rounds_at_level(2), 3);
    }

    #[tokio::test]
    async fn rules_without_policy_are_ignored() {
        let (scheduler, store) = scheduler_with_rule(None);
        let t0 = Utc::now();
        let id = open_alert(&store, t0);

        let actions = scheduler.tick(t0 + Duration::hours(1)).await;
        assert!(actions.is_empty());
        assert_eq!(store.get(id).unwrap().escalation_level, 0);
    }

    #[tokio::test]
    async fn tick_reopens_expired_suppressions_first() {
        let (scheduler, store) = scheduler_with_rule(Some(policy()));
        let t0 = Utc::now();
        let id = open_alert(&store, t0);
        store.suppress(id, 1, "deploy", t0).unwrap();

        // Still suppressed, so no escalation despite elapsed timeout.
        let actions = scheduler.tick(t0 + Duration::seconds(30)).await;
        assert!(actions.is_empty());

        // Past the suppression window the alert reopens and escalates in
        // the same tick.
        let actions = scheduler.tick(t0 + Duration::seconds(400)).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(store.get(id).unwrap().escalation_level, 1);
    }
}
