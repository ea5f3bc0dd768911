//! Health check controller.

use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_cache::MetricsSnapshot;
use strata_monitor::{Alert, DashboardSnapshot, KeyMemory, StoreHealth};
use tracing::warn;
use utoipa::ToSchema;

/// Keys listed by the top-keys endpoint.
const TOP_KEYS_LIMIT: usize = 10;

/// Liveness response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Creates the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/redis", get(store_health))
        .route("/health/cache/metrics", get(cache_metrics))
        .route("/health/dashboard", get(dashboard))
        .route("/health/cache/top-keys", get(top_keys))
        .route("/health/alerts", get(active_alerts))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

/// Store memory status.
#[utoipa::path(
    get,
    path = "/health/redis",
    tag = "health",
    responses(
        (status = 200, description = "Store status and memory statistics", body = StoreHealth)
    )
)]
pub async fn store_health(State(state): State<AppState>) -> Json<StoreHealth> {
    Json(state.monitor.get_health_status().await)
}

#[utoipa::path(
    get,
    path = "/health/cache/metrics",
    tag = "health",
    responses(
        (status = 200, description = "Cache counters", body = MetricsSnapshot)
    )
)]
pub async fn cache_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[utoipa::path(
    get,
    path = "/health/dashboard",
    tag = "health",
    responses(
        (status = 200, description = "Aggregated health view", body = DashboardSnapshot)
    )
)]
pub async fn dashboard(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    Json(state.dashboard.get_dashboard_data().await)
}

/// Largest sampled keys. An unreachable store yields an empty list.
#[utoipa::path(
    get,
    path = "/health/cache/top-keys",
    tag = "health",
    responses(
        (status = 200, description = "Largest keys among a random sample", body = [KeyMemory])
    )
)]
pub async fn top_keys(State(state): State<AppState>) -> Json<Vec<KeyMemory>> {
    let keys = state
        .monitor
        .get_top_keys_by_memory(TOP_KEYS_LIMIT)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to sample top keys");
            Vec::new()
        });
    Json(keys)
}

#[utoipa::path(
    get,
    path = "/health/alerts",
    tag = "health",
    responses(
        (status = 200, description = "Alerts raised in the last 24 hours", body = [Alert])
    )
)]
pub async fn active_alerts(State(state): State<AppState>) -> Json<Vec<Alert>> {
    Json(state.dashboard.get_active_alerts())
}
