//! The composed service: four scheduler loops over the detection and
//! alerting subsystems, plus the admin surface.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use vigil_alerting::{
    Alert, AlertFilter, AlertId, AlertRule, AlertStatus, AlertStore, Channel,
    EscalationScheduler, NotificationDispatcher, NotificationProvider, RuleEngine,
};
use vigil_detection::{
    Anomaly, AnomalyFilter, DetectionOutcome, DetectorConfig, DetectorRegistry, DetectorState,
};
use vigil_types::{HistoricalMetricSource, MetricSource, Severity};

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::events::VigilEvent;

/// Aggregate operational snapshot for dashboards and health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub detectors: Vec<(String, DetectorState)>,
    pub open_alerts_by_severity: BTreeMap<Severity, usize>,
    pub total_alerts: usize,
    pub providers: Vec<(Channel, bool)>,
}

/// The monitoring pipeline as one owned object.
///
/// Constructed once at process start; all maps live behind this struct,
/// and the scheduler loops receive `Arc` handles rather than touching any
/// global state. Tick methods take an explicit `now` so tests can drive
/// them with a synthetic clock; the spawned loops feed them `Utc::now()`.
pub struct VigilService {
    config: ServiceConfig,
    registry: Arc<DetectorRegistry>,
    store: Arc<AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
    engine: Arc<RuleEngine>,
    scheduler: Arc<EscalationScheduler>,
    source: Arc<dyn MetricSource>,
    history: Arc<dyn HistoricalMetricSource>,
    events: broadcast::Sender<VigilEvent>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl VigilService {
    pub fn new(
        config: ServiceConfig,
        source: Arc<dyn MetricSource>,
        history: Arc<dyn HistoricalMetricSource>,
    ) -> ServiceResult<Self> {
        config.validate()?;

        let registry = Arc::new(DetectorRegistry::new(config.anomaly_log_capacity));
        let store = Arc::new(AlertStore::new());
        let dispatcher = Arc::new(NotificationDispatcher::new());
        let engine = Arc::new(RuleEngine::new(Arc::clone(&store), Arc::clone(&dispatcher)));
        let scheduler = Arc::new(EscalationScheduler::new(
            engine.rules_handle(),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
        ));
        let (events, _) = broadcast::channel(config.event_capacity);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            registry,
            store,
            dispatcher,
            engine,
            scheduler,
            source,
            history,
            events,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Spawn the four scheduler loops. Idempotent start is an error so a
    /// double start cannot double the tick rate.
    pub fn start(self: &Arc<Self>) -> ServiceResult<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return Err(ServiceError::AlreadyRunning);
        }
        let _ = self.shutdown.send(false);

        let loops = [
            ("training", self.config.training_interval),
            ("detection", self.config.detection_interval),
            ("rules", self.config.rule_interval),
            ("escalation", self.config.escalation_interval),
        ];
        for (name, interval) in loops {
            let service = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick completes immediately; consume it so the
                // loop starts one full interval after spawn.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let now = Utc::now();
                            match name {
                                "training" => service.training_tick(now).await,
                                "detection" => service.detection_tick(now).await,
                                "rules" => service.rule_tick(now).await,
                                _ => service.escalation_tick(now).await,
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!(loop_name = name, "scheduler loop stopped");
                                break;
                            }
                        }
                    }
                }
            }));
        }
        info!("service started");
        Ok(())
    }

    /// Signal all loops to stop and wait for them to exit. In-flight
    /// dispatches complete before their loop parks.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
        info!("service stopped");
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<VigilEvent> {
        self.events.subscribe()
    }

    // ── Scheduler ticks ─────────────────────────────────────────────

    pub async fn training_tick(&self, now: DateTime<Utc>) {
        self.registry.train_all(self.history.as_ref(), now).await;
    }

    /// One detection sweep. Anomalies whose detector admits alerting are
    /// turned into operator-visible alerts and dispatched on the
    /// detector's channels.
    pub async fn detection_tick(&self, now: DateTime<Utc>) {
        let outcomes = self.registry.detect_all(self.source.as_ref(), now).await;
        for outcome in outcomes {
            let _ = self.events.send(VigilEvent::AnomalyDetected {
                detector_id: outcome.detector_id.clone(),
                anomaly: outcome.anomaly.clone(),
            });
            if outcome.should_alert {
                self.raise_anomaly_alert(outcome, now).await;
            }
        }
    }

    pub async fn rule_tick(&self, now: DateTime<Utc>) {
        let raised = self
            .engine
            .evaluate_all(self.source.as_ref(), Some(self.history.as_ref()), now)
            .await;
        for alert_id in raised {
            if let Some(alert) = self.store.get(alert_id) {
                let _ = self.events.send(VigilEvent::AlertRaised {
                    alert_id,
                    rule_id: alert.rule_id,
                    severity: alert.severity,
                });
            }
        }
    }

    pub async fn escalation_tick(&self, now: DateTime<Utc>) {
        for action in self.scheduler.tick(now).await {
            let _ = self.events.send(VigilEvent::AlertEscalated {
                alert_id: action.alert_id,
                rule_id: action.rule_id,
                level: action.level,
                repeated: action.repeated,
            });
        }
    }

    async fn raise_anomaly_alert(&self, outcome: DetectionOutcome, now: DateTime<Utc>) {
        let anomaly = &outcome.anomaly;
        let mut context = HashMap::new();
        context.insert("source".to_string(), "detector".to_string());
        context.insert("metric".to_string(), anomaly.metric.clone());
        context.insert("value".to_string(), anomaly.value.to_string());
        context.insert("expected".to_string(), anomaly.expected_value.to_string());
        context.insert("score".to_string(), format!("{:.3}", anomaly.score));

        let alert = Alert::new(&outcome.detector_id, anomaly.severity, now, context);
        let alert_id = self.store.insert(alert.clone());

        let channels: Vec<Channel> = outcome
            .channels
            .iter()
            .filter_map(|name| match name.parse() {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!(detector = %outcome.detector_id, error = %e, "bad channel name");
                    None
                }
            })
            .collect();
        let records = self.dispatcher.dispatch(&alert, &channels, &[], 0, now).await;
        if let Err(e) = self.store.update(alert_id, |a| {
            a.notifications.extend(records);
            Ok(())
        }) {
            warn!(alert_id = %alert_id, error = %e, "failed to record notifications");
        }

        info!(
            detector = %outcome.detector_id,
            alert_id = %alert_id,
            severity = %anomaly.severity,
            "anomaly alert raised"
        );
        let _ = self.events.send(VigilEvent::AlertRaised {
            alert_id,
            rule_id: outcome.detector_id,
            severity: anomaly.severity,
        });
    }

    // ── Admin surface: detectors ────────────────────────────────────

    pub fn upsert_detector(&self, config: DetectorConfig) -> ServiceResult<()> {
        self.registry.upsert_detector(config)?;
        Ok(())
    }

    pub fn remove_detector(&self, id: &str) -> ServiceResult<()> {
        self.registry.remove_detector(id)?;
        Ok(())
    }

    pub fn detector(&self, id: &str) -> Option<DetectorConfig> {
        self.registry.get_detector(id)
    }

    pub fn detector_states(&self) -> Vec<(String, DetectorState)> {
        self.registry.states()
    }

    pub fn anomalies(&self, filter: &AnomalyFilter) -> Vec<Anomaly> {
        self.registry.anomalies(filter)
    }

    // ── Admin surface: rules and alerts ─────────────────────────────

    pub fn upsert_rule(&self, rule: AlertRule) -> ServiceResult<()> {
        self.engine.upsert_rule(rule)?;
        Ok(())
    }

    pub fn remove_rule(&self, id: &str) -> ServiceResult<()> {
        self.engine.remove_rule(id)?;
        Ok(())
    }

    pub fn rule(&self, id: &str) -> Option<AlertRule> {
        self.engine.rule(id)
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.engine.rules()
    }

    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.store.alerts(filter)
    }

    pub fn acknowledge(&self, id: AlertId, by: impl Into<String>) -> ServiceResult<()> {
        let by = by.into();
        self.store.acknowledge(id, by.clone(), Utc::now())?;
        let _ = self.events.send(VigilEvent::AlertAcknowledged { alert_id: id, by });
        Ok(())
    }

    pub fn resolve(&self, id: AlertId) -> ServiceResult<()> {
        self.store.resolve(id, Utc::now())?;
        let _ = self.events.send(VigilEvent::AlertResolved { alert_id: id });
        Ok(())
    }

    pub fn suppress(
        &self,
        id: AlertId,
        duration_minutes: i64,
        reason: impl Into<String>,
    ) -> ServiceResult<()> {
        self.store.suppress(id, duration_minutes, reason, Utc::now())?;
        let _ = self.events.send(VigilEvent::AlertSuppressed {
            alert_id: id,
            duration_minutes,
        });
        Ok(())
    }

    // ── Providers and health ────────────────────────────────────────

    pub fn register_provider(&self, provider: Arc<dyn NotificationProvider>) {
        self.dispatcher.register_provider(provider);
    }

    pub async fn health_summary(&self) -> HealthSummary {
        let open = self.store.alerts(&AlertFilter {
            status: Some(AlertStatus::Open),
            ..Default::default()
        });
        let mut open_alerts_by_severity = BTreeMap::new();
        for alert in &open {
            *open_alerts_by_severity.entry(alert.severity).or_insert(0) += 1;
        }
        HealthSummary {
            detectors: self.registry.states(),
            open_alerts_by_severity,
            total_alerts: self.store.len(),
            providers: self.dispatcher.provider_health().await,
        }
    }
}
