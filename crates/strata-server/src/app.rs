//! Node assembly.

use axum::Router;
use std::sync::Arc;
use strata_cache::{Cache, CacheStore, MemoryStore, MetricsRecorder, RedisStore, StoreInspector, TagIndex};
use strata_config::{AlertsConfig, AppConfig};
use strata_core::StrataResult;
use strata_jobs::{Scheduler, TaskError, TaskResult, Trigger};
use strata_monitor::{AlertDispatcher, AlertLog, HealthDashboard, SlackAlertSink, StoreHealthMonitor};
use strata_rest::{create_router, AppState, ResponseCacheGate};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

pub const MEMORY_CHECK_TASK: &str = "memory-check";
pub const DASHBOARD_TASK: &str = "dashboard-sweep";
pub const TAG_RECONCILE_TASK: &str = "tag-reconcile";

/// Every long-lived component of a running node.
pub struct Node {
    config: AppConfig,
    pub cache: Cache,
    pub metrics: Arc<MetricsRecorder>,
    pub monitor: Arc<StoreHealthMonitor>,
    pub dashboard: Arc<HealthDashboard>,
    pub alert_log: Arc<AlertLog>,
}

impl Node {
    /// Connects to Redis, or uses the in-process store when Redis is disabled.
    pub fn build(config: AppConfig) -> StrataResult<Self> {
        if config.redis.enabled {
            let store = Arc::new(RedisStore::from_config(&config.redis)?);
            info!(host = %config.redis.host, port = config.redis.port, "Using Redis store");
            Ok(Self::with_store(config, store))
        } else {
            let store = Arc::new(MemoryStore::new(config.cache.max_items));
            info!(max_items = config.cache.max_items, "Redis disabled, using in-process store");
            Ok(Self::with_store(config, store))
        }
    }

    pub fn with_store<S>(config: AppConfig, store: Arc<S>) -> Self
    where
        S: CacheStore + StoreInspector + 'static,
    {
        let metrics = Arc::new(MetricsRecorder::new());
        let cache = Cache::new(store.clone(), Arc::new(TagIndex::new()), metrics.clone())
            .with_default_ttl(config.cache.default_ttl());

        let alert_log = Arc::new(AlertLog::new(config.alerts.log_capacity));
        let dispatcher = alert_dispatcher(&config.alerts, alert_log.clone());

        let monitor = Arc::new(
            StoreHealthMonitor::new(store, &config.redis.max_memory)
                .with_sample_size(config.monitor.key_sample_size)
                .with_dispatcher(dispatcher.clone()),
        );
        let dashboard = Arc::new(
            HealthDashboard::new(monitor.clone(), metrics.clone(), alert_log.clone())
                .with_dispatcher(dispatcher),
        );

        Self {
            config,
            cache,
            metrics,
            monitor,
            dashboard,
            alert_log,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// HTTP router with `api` mounted behind the response cache gate.
    pub fn router(&self, api: Router) -> Router {
        let state = AppState::new(self.metrics.clone(), self.monitor.clone(), self.dashboard.clone());
        let gate = ResponseCacheGate::new(self.cache.clone(), self.config.cache.http.clone());

        create_router(state, gate, api).layer(TimeoutLayer::new(self.config.server.request_timeout()))
    }

    /// Scheduler carrying the memory check, dashboard sweep and tag
    /// reconciliation. The caller starts it.
    pub fn scheduler(&self) -> TaskResult<Scheduler> {
        let settings = &self.config.monitor;
        let scheduler = Scheduler::new();

        let monitor = self.monitor.clone();
        scheduler.schedule(
            MEMORY_CHECK_TASK,
            Trigger::from_config(
                settings.memory_check_interval_secs,
                settings.memory_check_cron.as_deref(),
            )?,
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor
                        .check_memory_usage()
                        .await
                        .map(|_| ())
                        .map_err(|e| TaskError::failed(e.to_string()))
                }
            },
        )?;

        let dashboard = self.dashboard.clone();
        scheduler.schedule(
            DASHBOARD_TASK,
            Trigger::from_config(settings.dashboard_interval_secs, settings.dashboard_cron.as_deref())?,
            move || {
                let dashboard = dashboard.clone();
                async move {
                    dashboard.perform_health_check().await;
                    Ok(())
                }
            },
        )?;

        let cache = self.cache.clone();
        scheduler.schedule(
            TAG_RECONCILE_TASK,
            Trigger::from_config(settings.tag_reconcile_interval_secs, None)?,
            move || {
                let cache = cache.clone();
                async move {
                    cache.reconcile_tags().await;
                    Ok(())
                }
            },
        )?;

        Ok(scheduler)
    }
}

fn alert_dispatcher(config: &AlertsConfig, log: Arc<AlertLog>) -> AlertDispatcher {
    let dispatcher = AlertDispatcher::new().with_sink(log);
    match config.slack_webhook_url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => {
            info!("Slack alerts enabled");
            dispatcher.with_sink(Arc::new(SlackAlertSink::new(url)))
        }
        None => dispatcher,
    }
}
