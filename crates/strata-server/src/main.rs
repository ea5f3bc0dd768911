//! # Strata Server
//!
//! Entry point for a Strata node: loads configuration, connects the store,
//! starts the background scheduler and serves the HTTP surface until a
//! shutdown signal arrives.

use axum::Router;
use strata_config::ConfigLoader;
use strata_core::{init_logging, LogFormat, StrataError, StrataResult};
use strata_server::{app::Node, startup::print_startup_info};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(code = e.error_code(), "Application error: {}", e);
        eprintln!("strata-server: {e}");
        std::process::exit(1);
    }
}

async fn run() -> StrataResult<()> {
    let config = ConfigLoader::from_default_location()?.get().await;

    init_logging(
        &config.observability.log_level,
        LogFormat::from_name(&config.observability.log_format),
    );
    strata_cache::metrics::register_metrics();
    strata_jobs::register_metrics();

    info!("Starting Strata server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let node = Node::build(config.clone())?;

    let scheduler = node
        .scheduler()
        .map_err(|e| StrataError::configuration(e.to_string()))?;
    scheduler
        .start()
        .map_err(|e| StrataError::internal(e.to_string()))?;

    let router = node.router(Router::new());

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| StrataError::internal(format!("Failed to bind {addr}: {e}")))?;
    print_startup_info(&config);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StrataError::internal(format!("REST server error: {e}")))?;

    scheduler.stop();
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
