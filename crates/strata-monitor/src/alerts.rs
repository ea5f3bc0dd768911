//! Alerts and alert delivery.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of entries kept by [`AlertLog`].
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Extra context forwarded to sinks that can render it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            details: BTreeMap::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Error, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Critical, message)
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),
}

impl From<reqwest::Error> for AlertError {
    fn from(err: reqwest::Error) -> Self {
        Self::Delivery(err.to_string())
    }
}

/// Destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Bounded in-memory log; the oldest entries are dropped first.
pub struct AlertLog {
    capacity: usize,
    entries: RwLock<VecDeque<Alert>>,
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, alert: Alert) {
        let mut entries = self.entries.write();
        entries.push_back(alert);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn add(&self, level: AlertLevel, message: impl Into<String>) {
        self.push(Alert::new(level, message));
    }

    /// Alerts raised in the last 24 hours, oldest first.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active_since(Utc::now() - Duration::hours(24))
    }

    pub fn active_since(&self, since: DateTime<Utc>) -> Vec<Alert> {
        self.entries
            .read()
            .iter()
            .filter(|a| a.timestamp > since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl AlertSink for AlertLog {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        self.push(alert.clone());
        Ok(())
    }
}

/// Posts alerts to a Slack incoming webhook.
pub struct SlackAlertSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackAlertSink {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), webhook_url)
    }

    pub fn with_client(client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }

    fn payload(alert: &Alert) -> Value {
        let mut fields = vec![
            json!({"title": "level", "value": alert.level.as_str(), "short": true}),
            json!({"title": "timestamp", "value": alert.timestamp.to_rfc3339(), "short": true}),
        ];
        fields.extend(
            alert
                .details
                .iter()
                .map(|(title, value)| json!({"title": title, "value": value, "short": true})),
        );

        json!({
            "text": format!("🚨 {}", alert.message),
            "attachments": [{
                "color": "danger",
                "fields": fields,
            }],
        })
    }
}

#[async_trait]
impl AlertSink for SlackAlertSink {
    fn name(&self) -> &str {
        "slack"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        self.client
            .post(&self.webhook_url)
            .json(&Self::payload(alert))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Fans alerts out to every configured sink.
///
/// A failing sink is logged and skipped; dispatch never fails.
#[derive(Clone, Default)]
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn dispatch(&self, alert: &Alert) {
        let deliveries = self.sinks.iter().map(|sink| async move {
            if let Err(e) = sink.deliver(alert).await {
                warn!(sink = sink.name(), error = %e, "Failed to deliver alert");
            }
        });
        join_all(deliveries).await;
        debug!(level = %alert.level, sinks = self.sinks.len(), "Alert dispatched");
    }

    pub async fn dispatch_all(&self, alerts: &[Alert]) {
        for alert in alerts {
            self.dispatch(alert).await;
        }
    }
}
