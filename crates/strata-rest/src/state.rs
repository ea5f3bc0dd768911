//! Application state for Axum handlers.

use std::sync::Arc;
use strata_cache::MetricsRecorder;
use strata_monitor::{HealthDashboard, StoreHealthMonitor};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<MetricsRecorder>,
    pub monitor: Arc<StoreHealthMonitor>,
    pub dashboard: Arc<HealthDashboard>,
}

impl AppState {
    pub fn new(
        metrics: Arc<MetricsRecorder>,
        monitor: Arc<StoreHealthMonitor>,
        dashboard: Arc<HealthDashboard>,
    ) -> Self {
        Self {
            metrics,
            monitor,
            dashboard,
        }
    }
}
