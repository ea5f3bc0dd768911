//! Aggregated health view over the store memory check and cache counters.

use crate::alerts::{Alert, AlertDispatcher, AlertLevel, AlertLog};
use crate::memory::{HealthStatus, MemoryStats};
use crate::store_health::{KeyMemory, StoreHealth, StoreHealthMonitor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_cache::{MetricsRecorder, MetricsSnapshot};
use tracing::{error, warn};

/// Keys listed on the dashboard.
const DASHBOARD_TOP_KEYS: usize = 5;

/// Error count above which the dashboard raises an alert.
const ERROR_COUNT_THRESHOLD: u64 = 100;

/// Keyspace size above which eviction policies are recommended.
const KEY_COUNT_THRESHOLD: u64 = 10_000;

/// Mean hit latency (ms) above which store performance is questioned.
const SLOW_RESPONSE_MS: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub redis: StoreHealth,
    pub cache: MetricsSnapshot,
    pub top_memory_keys: Vec<KeyMemory>,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
}

/// Alerts derived from one memory check and one counter snapshot.
///
/// The hit-rate rule only applies once something has been looked up.
pub fn generate_alerts(store: &StoreHealth, cache: &MetricsSnapshot) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let usage = store.stats.memory_usage_percentage;

    if usage > 90.0 {
        alerts.push(Alert::critical(format!("Redis memory usage critical: {usage:.1}%")));
    } else if usage > 80.0 {
        alerts.push(Alert::warning(format!("Redis memory usage high: {usage:.1}%")));
    }

    if has_lookups(cache) && cache.hit_rate < 50.0 {
        alerts.push(Alert::warning(format!("Low cache hit rate: {:.1}%", cache.hit_rate)));
    }

    if store.status == HealthStatus::Unhealthy {
        alerts.push(Alert::error("Redis connection unhealthy"));
    }

    if cache.errors > ERROR_COUNT_THRESHOLD {
        alerts.push(Alert::error(format!("High cache error count: {}", cache.errors)));
    }

    alerts
}

/// Unhealthy on any critical alert, degraded on any error or warning.
pub fn overall_status(alerts: &[Alert]) -> HealthStatus {
    match alerts.iter().map(|a| a.level).max() {
        Some(AlertLevel::Critical) => HealthStatus::Unhealthy,
        Some(AlertLevel::Error | AlertLevel::Warning) => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    }
}

pub fn generate_recommendations(stats: &MemoryStats, cache: &MetricsSnapshot) -> Vec<String> {
    let mut recommendations = Vec::new();

    if stats.memory_usage_percentage > 70.0 {
        recommendations.push("Consider increasing Redis memory limit".to_string());
        recommendations.push("Review cache TTL settings for optimization".to_string());
    }

    if has_lookups(cache) && cache.hit_rate < 70.0 {
        recommendations.push("Review cache key strategy".to_string());
        recommendations.push("Consider caching more frequently accessed data".to_string());
    }

    if stats.total_keys > KEY_COUNT_THRESHOLD {
        recommendations
            .push("High number of keys - consider implementing cache eviction policies".to_string());
    }

    if cache.average_response_time > SLOW_RESPONSE_MS {
        recommendations.push("High cache response time - check Redis server performance".to_string());
    }

    recommendations
}

fn has_lookups(cache: &MetricsSnapshot) -> bool {
    cache.hits + cache.misses > 0
}

/// Combines the store memory check, cache counters and manual alerts.
pub struct HealthDashboard {
    monitor: Arc<StoreHealthMonitor>,
    metrics: Arc<MetricsRecorder>,
    alert_log: Arc<AlertLog>,
    dispatcher: AlertDispatcher,
}

impl HealthDashboard {
    pub fn new(monitor: Arc<StoreHealthMonitor>, metrics: Arc<MetricsRecorder>, alert_log: Arc<AlertLog>) -> Self {
        Self {
            monitor,
            metrics,
            alert_log,
            dispatcher: AlertDispatcher::new(),
        }
    }

    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: AlertDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn monitor(&self) -> &Arc<StoreHealthMonitor> {
        &self.monitor
    }

    pub async fn get_dashboard_data(&self) -> DashboardSnapshot {
        let (redis, top_keys) = tokio::join!(
            self.monitor.get_health_status(),
            self.monitor.get_top_keys_by_memory(DASHBOARD_TOP_KEYS),
        );
        let cache = self.metrics.snapshot();

        let top_memory_keys = top_keys.unwrap_or_else(|e| {
            warn!(error = %e, "Could not sample top memory keys for dashboard");
            Vec::new()
        });

        let alerts = generate_alerts(&redis, &cache);
        let recommendations = generate_recommendations(&redis.stats, &cache);

        DashboardSnapshot {
            timestamp: Utc::now(),
            status: overall_status(&alerts),
            redis,
            cache,
            top_memory_keys,
            alerts,
            recommendations,
        }
    }

    /// Periodic sweep: logs the outcome and remediates when unhealthy.
    pub async fn perform_health_check(&self) -> DashboardSnapshot {
        let snapshot = self.get_dashboard_data().await;

        if snapshot.status != HealthStatus::Healthy {
            let messages: Vec<&str> = snapshot.alerts.iter().map(|a| a.message.as_str()).collect();
            warn!(status = ?snapshot.status, alerts = ?messages, "Health check found issues");
        }

        if snapshot.status == HealthStatus::Unhealthy {
            self.handle_unhealthy(&snapshot).await;
        }

        snapshot
    }

    async fn handle_unhealthy(&self, snapshot: &DashboardSnapshot) {
        error!("System is unhealthy, running remediation");

        self.monitor.clean_expired_keys().await;

        let critical: Vec<Alert> = snapshot
            .alerts
            .iter()
            .filter(|a| a.level == AlertLevel::Critical)
            .cloned()
            .collect();
        self.dispatcher.dispatch_all(&critical).await;
    }

    pub fn add_alert(&self, level: AlertLevel, message: impl Into<String>) {
        self.alert_log.add(level, message);
    }

    /// Manually added or dispatched alerts from the last 24 hours.
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.alert_log.active_alerts()
    }
}
