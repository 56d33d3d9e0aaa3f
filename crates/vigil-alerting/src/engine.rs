//! Rule evaluation: condition checks, debounce, rate limiting, and alert
//! creation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};
use vigil_types::{HistoricalMetricSource, MetricSource, MetricValue};

use crate::alert::{Alert, AlertId};
use crate::error::{AlertingError, AlertingResult};
use crate::notify::NotificationDispatcher;
use crate::rule::AlertRule;
use crate::store::AlertStore;

/// Per-rule evaluation state. Guarded by its dashmap entry so debounce
/// and cooldown decisions are atomic per rule.
#[derive(Debug, Default, Clone)]
struct RuleState {
    /// When the condition first became true in the current streak.
    condition_start: Option<DateTime<Utc>>,
    last_alert: Option<DateTime<Utc>>,
}

/// Evaluates alert rules against metric sources and raises alerts.
///
/// One alert per rule per firing, gated in order by: enabled flag,
/// schedule, suppression rules, debounce duration, cooldown, and the
/// hourly alert cap. Missing metric data skips the rule without clearing
/// its debounce streak.
pub struct RuleEngine {
    rules: Arc<DashMap<String, AlertRule>>,
    states: DashMap<String, RuleState>,
    store: Arc<AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl RuleEngine {
    pub fn new(store: Arc<AlertStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            states: DashMap::new(),
            store,
            dispatcher,
        }
    }

    /// Shared handle to the rule table, for the escalation scheduler.
    pub fn rules_handle(&self) -> Arc<DashMap<String, AlertRule>> {
        Arc::clone(&self.rules)
    }

    /// Add or replace a rule. Replacing a rule clears its evaluation
    /// state so debounce streaks never span definitions.
    pub fn upsert_rule(&self, rule: AlertRule) -> AlertingResult<()> {
        rule.validate()?;
        let id = rule.id.clone();
        self.states.remove(&id);
        let replaced = self.rules.insert(id.clone(), rule).is_some();
        info!(rule_id = %id, replaced, "alert rule upserted");
        Ok(())
    }

    pub fn remove_rule(&self, id: &str) -> AlertingResult<()> {
        self.states.remove(id);
        self.rules
            .remove(id)
            .map(|_| info!(rule_id = %id, "alert rule removed"))
            .ok_or_else(|| AlertingError::RuleNotFound(id.to_string()))
    }

    pub fn rule(&self, id: &str) -> Option<AlertRule> {
        self.rules.get(id).map(|r| r.clone())
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        let mut out: Vec<AlertRule> = self.rules.iter().map(|r| r.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Evaluate one rule at `now`. Returns the created alert id when the
    /// rule fired.
    pub async fn evaluate_rule(
        &self,
        id: &str,
        source: &dyn MetricSource,
        historical: Option<&dyn HistoricalMetricSource>,
        now: DateTime<Utc>,
    ) -> AlertingResult<Option<AlertId>> {
        let rule = self
            .rules
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| AlertingError::RuleNotFound(id.to_string()))?;

        if !rule.enabled {
            return Ok(None);
        }
        if !rule.schedule.allows(now) {
            debug!(rule_id = %id, "rule outside its schedule");
            return Ok(None);
        }

        let Some(value) = self.observe(&rule, source, historical, now).await else {
            debug!(rule_id = %id, metric = %rule.metric, "no data for metric");
            return Ok(None);
        };

        let condition = rule
            .operator
            .evaluate(&value, &rule.threshold)
            .map_err(|detail| AlertingError::Evaluation {
                metric: rule.metric.clone(),
                detail,
            })?;

        if condition && self.is_suppressed(&rule, source).await {
            debug!(rule_id = %id, "firing muted by suppression rule");
            return Ok(None);
        }

        // Debounce, cooldown, and the hourly cap are decided under the
        // state entry lock. No awaits below until the guard drops.
        let alert = {
            let mut state = self.states.entry(id.to_string()).or_default();
            if !condition {
                state.condition_start = None;
                return Ok(None);
            }
            let start = *state.condition_start.get_or_insert(now);
            if now - start < Duration::seconds(rule.duration_secs as i64) {
                debug!(rule_id = %id, "condition holding, debounce pending");
                return Ok(None);
            }
            if let Some(last) = state.last_alert {
                if now - last < Duration::seconds(rule.cooldown_secs as i64) {
                    return Ok(None);
                }
            }
            if let Some(max) = rule.max_alerts_per_hour {
                let recent = self
                    .store
                    .alerts_created_since(&rule.id, now - Duration::hours(1));
                if recent >= max as usize {
                    warn!(rule_id = %id, max, "hourly alert cap reached");
                    return Ok(None);
                }
            }
            state.last_alert = Some(now);

            let mut context = HashMap::new();
            context.insert("metric".to_string(), rule.metric.clone());
            context.insert("value".to_string(), value.to_string());
            context.insert("threshold".to_string(), rule.threshold.to_string());
            context.insert("rule_name".to_string(), rule.name.clone());
            if let Some(category) = &rule.category {
                context.insert("category".to_string(), category.clone());
            }
            Alert::new(&rule.id, rule.severity, now, context)
        };

        let alert_id = alert.id;
        self.store.insert(alert.clone());
        info!(
            rule_id = %rule.id,
            alert_id = %alert_id,
            severity = %rule.severity,
            value = %value,
            "alert raised"
        );

        let records = self
            .dispatcher
            .dispatch(&alert, &rule.channels, &rule.recipients, 0, now)
            .await;
        self.store.update(alert_id, |a| {
            a.notifications.extend(records);
            Ok(())
        })?;

        Ok(Some(alert_id))
    }

    /// Evaluate every rule once. A failing rule is logged and skipped;
    /// it never aborts its siblings.
    pub async fn evaluate_all(
        &self,
        source: &dyn MetricSource,
        historical: Option<&dyn HistoricalMetricSource>,
        now: DateTime<Utc>,
    ) -> Vec<AlertId> {
        let ids: Vec<String> = self.rules.iter().map(|r| r.key().clone()).collect();
        let mut raised = Vec::new();
        for id in ids {
            match self.evaluate_rule(&id, source, historical, now).await {
                Ok(Some(alert_id)) => raised.push(alert_id),
                Ok(None) => {}
                Err(e) => warn!(rule_id = %id, error = %e, "rule evaluation failed"),
            }
        }
        raised
    }

    async fn observe(
        &self,
        rule: &AlertRule,
        source: &dyn MetricSource,
        historical: Option<&dyn HistoricalMetricSource>,
        now: DateTime<Utc>,
    ) -> Option<MetricValue> {
        if let Some(window) = &rule.aggregation {
            if let Some(historical) = historical {
                let start = now - Duration::seconds(window.window_secs as i64);
                let samples = historical.historical_series(&rule.metric, start, now).await;
                return window.aggregation.apply(&samples).map(MetricValue::Numeric);
            }
            debug!(rule_id = %rule.id, "no historical source, using instantaneous value");
        }
        source.current_value(&rule.metric).await
    }

    async fn is_suppressed(&self, rule: &AlertRule, source: &dyn MetricSource) -> bool {
        for suppression in &rule.suppression_rules {
            let Some(value) = source.current_value(&suppression.metric).await else {
                continue;
            };
            match suppression.operator.evaluate(&value, &suppression.threshold) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(detail) => {
                    warn!(
                        rule_id = %rule.id,
                        metric = %suppression.metric,
                        detail,
                        "suppression rule evaluation failed"
                    );
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertStatus;
    use crate::notify::{Channel, LogProvider};
    use crate::rule::{AggregationWindow, Aggregation, ConditionOperator, SuppressionRule};
    use crate::store::AlertFilter;
    use async_trait::async_trait;
    use vigil_types::{MetricSample, Severity};

    struct TestSource {
        values: HashMap<String, MetricValue>,
        history: HashMap<String, Vec<MetricSample>>,
    }

    impl TestSource {
        fn numeric(metric: &str, value: f64) -> Self {
            let mut values = HashMap::new();
            values.insert(metric.to_string(), MetricValue::Numeric(value));
            Self {
                values,
                history: HashMap::new(),
            }
        }

        fn set(&mut self, metric: &str, value: MetricValue) {
            self.values.insert(metric.to_string(), value);
        }
    }

    #[async_trait]
    impl MetricSource for TestSource {
        async fn current_value(&self, metric: &str) -> Option<MetricValue> {
            self.values.get(metric).cloned()
        }
    }

    #[async_trait]
    impl HistoricalMetricSource for TestSource {
        async fn historical_series(
            &self,
            metric: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Vec<MetricSample> {
            self.history
                .get(metric)
                .map(|samples| {
                    samples
                        .iter()
                        .filter(|s| s.timestamp >= start && s.timestamp <= end)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    fn engine() -> (RuleEngine, Arc<AlertStore>) {
        let store = Arc::new(AlertStore::new());
        let dispatcher = Arc::new(NotificationDispatcher::new());
        dispatcher.register_provider(Arc::new(LogProvider::new(Channel::Email)));
        (
            RuleEngine::new(Arc::clone(&store), dispatcher),
            store,
        )
    }

    fn cpu_rule() -> AlertRule {
        AlertRule::new(
            "cpu-high",
            "cpu_usage",
            ConditionOperator::Gt,
            MetricValue::Numeric(90.0),
            Severity::High,
        )
    }

    #[tokio::test]
    async fn unknown_rule_is_an_error() {
        let (engine, _) = engine();
        let source = TestSource::numeric("cpu_usage", 95.0);
        let err = engine
            .evaluate_rule("nope", &source, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AlertingError::RuleNotFound(_)));
    }

    #[tokio::test]
    async fn zero_duration_fires_on_first_observation() {
        let (engine, store) = engine();
        engine.upsert_rule(cpu_rule()).unwrap();

        let source = TestSource::numeric("cpu_usage", 95.0);
        let now = Utc::now();
        let id = engine
            .evaluate_rule("cpu-high", &source, None, now)
            .await
            .unwrap()
            .expect("alert");

        let alert = store.get(id).unwrap();
        assert_eq!(alert.status, AlertStatus::Open);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.escalation_level, 0);
        assert_eq!(alert.context["metric"], "cpu_usage");
        assert_eq!(alert.context["value"], "95");
        assert_eq!(alert.notifications.len(), 1);
        assert_eq!(alert.notifications[0].escalation_level, 0);
    }

    #[tokio::test]
    async fn below_threshold_never_fires() {
        let (engine, store) = engine();
        engine.upsert_rule(cpu_rule()).unwrap();

        let source = TestSource::numeric("cpu_usage", 50.0);
        let result = engine
            .evaluate_rule("cpu-high", &source, None, Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn debounce_requires_continuous_condition() {
        let (engine, store) = engine();
        let mut rule = cpu_rule();
        rule.duration_secs = 60;
        engine.upsert_rule(rule).unwrap();

        let mut source = TestSource::numeric("cpu_usage", 95.0);
        let t0 = Utc::now();

        assert!(engine
            .evaluate_rule("cpu-high", &source, None, t0)
            .await
            .unwrap()
            .is_none());
        assert!(engine
            .evaluate_rule("cpu-high", &source, None, t0 + Duration::seconds(59))
            .await
            .unwrap()
            .is_none());

        // Condition drops; the streak resets.
        source.set("cpu_usage", MetricValue::Numeric(10.0));
        engine
            .evaluate_rule("cpu-high", &source, None, t0 + Duration::seconds(60))
            .await
            .unwrap();

        source.set("cpu_usage", MetricValue::Numeric(95.0));
        assert!(engine
            .evaluate_rule("cpu-high", &source, None, t0 + Duration::seconds(90))
            .await
            .unwrap()
            .is_none());
        assert!(store.is_empty());

        // A full fresh streak fires.
        let fired = engine
            .evaluate_rule("cpu-high", &source, None, t0 + Duration::seconds(150))
            .await
            .unwrap();
        assert!(fired.is_some());
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_alerts() {
        let (engine, store) = engine();
        let mut rule = cpu_rule();
        rule.cooldown_secs = 300;
        engine.upsert_rule(rule).unwrap();

        let source = TestSource::numeric("cpu_usage", 95.0);
        let t0 = Utc::now();

        assert!(engine
            .evaluate_rule("cpu-high", &source, None, t0)
            .await
            .unwrap()
            .is_some());
        assert!(engine
            .evaluate_rule("cpu-high", &source, None, t0 + Duration::seconds(299))
            .await
            .unwrap()
            .is_none());
        assert!(engine
            .evaluate_rule("cpu-high", &source, None, t0 + Duration::seconds(300))
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn hourly_cap_limits_alert_volume() {
        let (engine, store) = engine();
        let mut rule = cpu_rule();
        rule.max_alerts_per_hour = Some(3);
        engine.upsert_rule(rule).unwrap();

        let source = TestSource::numeric("cpu_usage", 95.0);
        let t0 = Utc::now();
        for i in 0..5 {
            engine
                .evaluate_rule("cpu-high", &source, None, t0 + Duration::minutes(i * 5))
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 3);

        // Once the earliest alert ages out of the trailing hour, the rule
        // may fire again.
        let later = t0 + Duration::minutes(61);
        let fired = engine
            .evaluate_rule("cpu-high", &source, None, later)
            .await
            .unwrap();
        assert!(fired.is_some());
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn type_mismatch_is_an_evaluation_error() {
        let (engine, _) = engine();
        engine.upsert_rule(cpu_rule()).unwrap();

        let mut source = TestSource::numeric("cpu_usage", 0.0);
        source.set("cpu_usage", MetricValue::Text("degraded".into()));
        let err = engine
            .evaluate_rule("cpu-high", &source, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AlertingError::Evaluation { .. }));
    }

    #[tokio::test]
    async fn missing_metric_skips_quietly() {
        let (engine, store) = engine();
        engine.upsert_rule(cpu_rule()).unwrap();

        let source = TestSource {
            values: HashMap::new(),
            history: HashMap::new(),
        };
        let result = engine
            .evaluate_rule("cpu-high", &source, None, Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn disabled_rule_is_skipped() {
        let (engine, store) = engine();
        let mut rule = cpu_rule();
        rule.enabled = false;
        engine.upsert_rule(rule).unwrap();

        let source = TestSource::numeric("cpu_usage", 95.0);
        assert!(engine
            .evaluate_rule("cpu-high", &source, None, Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn suppression_rule_mutes_firing() {
        let (engine, store) = engine();
        let mut rule = cpu_rule();
        rule.suppression_rules = vec![SuppressionRule {
            metric: "deploy_in_progress".into(),
            operator: ConditionOperator::Eq,
            threshold: MetricValue::Numeric(1.0),
        }];
        engine.upsert_rule(rule).unwrap();

        let mut source = TestSource::numeric("cpu_usage", 95.0);
        source.set("deploy_in_progress", MetricValue::Numeric(1.0));
        assert!(engine
            .evaluate_rule("cpu-high", &source, None, Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(store.is_empty());

        source.set("deploy_in_progress", MetricValue::Numeric(0.0));
        assert!(engine
            .evaluate_rule("cpu-high", &source, None, Utc::now())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn aggregation_uses_the_historical_window() {
        let (engine, _) = engine();
        let mut rule = cpu_rule();
        rule.aggregation = Some(AggregationWindow {
            aggregation: Aggregation::Avg,
            window_secs: 300,
        });
        engine.upsert_rule(rule).unwrap();

        let now = Utc::now();
        let mut source = TestSource::numeric("cpu_usage", 10.0);
        source.history.insert(
            "cpu_usage".into(),
            vec![
                MetricSample {
                    metric: "cpu_usage".into(),
                    timestamp: now - Duration::seconds(200),
                    value: 92.0,
                },
                MetricSample {
                    metric: "cpu_usage".into(),
                    timestamp: now - Duration::seconds(100),
                    value: 96.0,
                },
                // Outside the window, must be ignored.
                MetricSample {
                    metric: "cpu_usage".into(),
                    timestamp: now - Duration::seconds(4000),
                    value: 0.0,
                },
            ],
        );

        let fired = engine
            .evaluate_rule("cpu-high", &source, Some(&source), now)
            .await
            .unwrap();
        assert!(fired.is_some());
    }

    #[tokio::test]
    async fn evaluate_all_isolates_failing_rules() {
        let (engine, store) = engine();
        engine.upsert_rule(cpu_rule()).unwrap();
        engine
            .upsert_rule(AlertRule::new(
                "status-bad",
                "service_status",
                ConditionOperator::Gt,
                MetricValue::Numeric(0.0),
                Severity::Low,
            ))
            .unwrap();

        let mut source = TestSource::numeric("cpu_usage", 95.0);
        source.set("service_status", MetricValue::Text("degraded".into()));

        let raised = engine.evaluate_all(&source, None, Utc::now()).await;
        assert_eq!(raised.len(), 1);
        assert_eq!(
            store.alerts(&AlertFilter::default())[0].rule_id,
            "cpu-high"
        );
    }

    #[tokio::test]
    async fn replacing_a_rule_resets_its_debounce() {
        let (engine, _) = engine();
        let mut rule = cpu_rule();
        rule.duration_secs = 60;
        engine.upsert_rule(rule.clone()).unwrap();

        let source = TestSource::numeric("cpu_usage", 95.0);
        let t0 = Utc::now();
        engine
            .evaluate_rule("cpu-high", &source, None, t0)
            .await
            .unwrap();

        engine.upsert_rule(rule).unwrap();
        // The streak restarted at the upsert, so 60s from the original
        // start is not enough.
        assert!(engine
            .evaluate_rule("cpu-high", &source, None, t0 + Duration::seconds(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn remove_rule_drops_it() {
        let (engine, _) = engine();
        engine.upsert_rule(cpu_rule()).unwrap();
        engine.remove_rule("cpu-high").unwrap();
        assert!(engine.rule("cpu-high").is_none());
        assert!(matches!(
            engine.remove_rule("cpu-high"),
            Err(AlertingError::RuleNotFound(_))
        ));
    }
}
