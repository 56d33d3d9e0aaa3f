//! Notification channels, provider trait, and concurrent fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alert::{Alert, Notification};

/// Supported notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Chat,
    Webhook,
    Pager,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Chat => write!(f, "chat"),
            Channel::Webhook => write!(f, "webhook"),
            Channel::Pager => write!(f, "pager"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "chat" => Ok(Channel::Chat),
            "webhook" => Ok(Channel::Webhook),
            "pager" => Ok(Channel::Pager),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// A pluggable delivery backend for one channel.
///
/// `send` returns whether delivery succeeded; providers must not panic on
/// delivery failure. Implementations should be cheap to clone behind `Arc`.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// The channel this provider serves.
    fn channel(&self) -> Channel;

    /// Deliver one alert to the given recipients.
    async fn send(&self, alert: &Alert, recipients: &[String]) -> bool;

    /// Whether the backend is currently reachable.
    async fn health_check(&self) -> bool;
}

/// Provider that writes notifications to the log. Used as a default
/// backend and in tests.
#[derive(Debug, Clone)]
pub struct LogProvider {
    channel: Channel,
}

impl LogProvider {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NotificationProvider for LogProvider {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, alert: &Alert, recipients: &[String]) -> bool {
        info!(
            channel = %self.channel,
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            severity = %alert.severity,
            recipients = recipients.len(),
            "notification"
        );
        true
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Default upper bound on a single provider send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Fans one alert out to every requested channel concurrently.
///
/// Every requested channel yields exactly one [`Notification`] record,
/// whether delivery succeeded, failed, timed out, or had no registered
/// provider. Dispatch never returns an error; failures are recorded.
pub struct NotificationDispatcher {
    providers: DashMap<Channel, Arc<dyn NotificationProvider>>,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Register (or replace) the provider for its channel.
    pub fn register_provider(&self, provider: Arc<dyn NotificationProvider>) {
        let channel = provider.channel();
        debug!(channel = %channel, "notification provider registered");
        self.providers.insert(channel, provider);
    }

    pub fn has_provider(&self, channel: Channel) -> bool {
        self.providers.contains_key(&channel)
    }

    /// Deliver one alert on each channel, concurrently. Returns one
    /// notification record per requested channel.
    pub async fn dispatch(
        &self,
        alert: &Alert,
        channels: &[Channel],
        recipients: &[String],
        escalation_level: u32,
        now: DateTime<Utc>,
    ) -> Vec<Notification> {
        let sends = channels.iter().map(|&channel| {
            // Clone out of the map before awaiting.
            let provider = self.providers.get(&channel).map(|p| Arc::clone(p.value()));
            let timeout = self.send_timeout;
            async move {
                let recipients = recipients.to_vec();
                let Some(provider) = provider else {
                    warn!(channel = %channel, alert_id = %alert.id, "no provider for channel");
                    return Notification::failed(
                        channel,
                        recipients,
                        escalation_level,
                        now,
                        "no provider registered",
                    );
                };
                match tokio::time::timeout(timeout, provider.send(alert, &recipients)).await {
                    Ok(true) => Notification::sent(channel, recipients, escalation_level, now),
                    Ok(false) => Notification::failed(
                        channel,
                        recipients,
                        escalation_level,
                        now,
                        "provider reported failure",
                    ),
                    Err(_) => {
                        warn!(channel = %channel, alert_id = %alert.id, "notification send timed out");
                        Notification::failed(
                            channel,
                            recipients,
                            escalation_level,
                            now,
                            "send timed out",
                        )
                    }
                }
            }
        });
        join_all(sends).await
    }

    /// Re-attempt delivery of a previously failed notification. The new
    /// record carries the prior attempt count plus one.
    pub async fn redispatch(
        &self,
        alert: &Alert,
        failed: &Notification,
        now: DateTime<Utc>,
    ) -> Notification {
        let mut results = self
            .dispatch(
                alert,
                &[failed.channel],
                &failed.recipients,
                failed.escalation_level,
                now,
            )
            .await;
        let mut result = results.remove(0);
        result.retry_count = failed.retry_count + 1;
        result
    }

    /// Health of every registered provider, by channel.
    pub async fn provider_health(&self) -> Vec<(Channel, bool)> {
        let providers: Vec<(Channel, Arc<dyn NotificationProvider>)> = self
            .providers
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        let mut out = Vec::with_capacity(providers.len());
        for (channel, provider) in providers {
            out.push((channel, provider.health_check().await));
        }
        out
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
