//! OpenAPI document for the health surface.

use crate::controllers::health_controller::HealthResponse;
use strata_cache::MetricsSnapshot;
use strata_monitor::{
    Alert, AlertLevel, DashboardSnapshot, HealthStatus, KeyMemory, MemoryStats, StoreHealth,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Strata API",
        version = "1.0.0",
        description = "Cache health and monitoring endpoints",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        crate::controllers::health_controller::health_check,
        crate::controllers::health_controller::store_health,
        crate::controllers::health_controller::cache_metrics,
        crate::controllers::health_controller::dashboard,
        crate::controllers::health_controller::top_keys,
        crate::controllers::health_controller::active_alerts,
    ),
    components(
        schemas(
            HealthResponse,
            HealthStatus,
            MemoryStats,
            StoreHealth,
            KeyMemory,
            MetricsSnapshot,
            Alert,
            AlertLevel,
            DashboardSnapshot,
        )
    ),
    tags(
        (name = "health", description = "Health and cache monitoring endpoints")
    )
)]
pub struct ApiDoc;
