//! Main application router.

use crate::{
    controllers::health_controller,
    middleware::{logging_middleware, response_cache_middleware, ResponseCacheGate},
    openapi::ApiDoc,
    state::AppState,
};
use axum::{middleware, routing::get, Json, Router};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;

/// Builds the node router.
///
/// `api` carries the application routes served behind the response cache
/// gate; the health endpoints and the OpenAPI document are merged beside it.
pub fn create_router(state: AppState, gate: ResponseCacheGate, api: Router) -> Router {
    let cached = api.layer(middleware::from_fn_with_state(gate, response_cache_middleware));

    let router = Router::new()
        .merge(health_controller::router().with_state(state))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/", get(root))
        .merge(cached)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(logging_middleware));

    info!("Router created with health endpoints and OpenAPI document at /api-docs/openapi.json");
    router
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn root() -> &'static str {
    "Strata API v1"
}
