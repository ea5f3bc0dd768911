//! Server startup utilities.

use strata_config::AppConfig;
use tracing::info;

/// Logs where the node can be reached and which store backs it.
pub fn print_startup_info(config: &AppConfig) {
    let separator = "=".repeat(60);
    let addr = config.server.addr();
    info!("{}", separator);
    info!("REST API:  http://{}", addr);
    info!("Health:    http://{}/health", addr);
    info!("Dashboard: http://{}/health/dashboard", addr);
    info!("API Docs:  http://{}/api-docs/openapi.json", addr);
    if config.redis.enabled {
        info!("Store:     redis://{}:{}/{}", config.redis.host, config.redis.port, config.redis.db);
    } else {
        info!("Store:     in-process ({} items)", config.cache.max_items);
    }
    info!("{}", separator);
}
