//! bitwit-server - BitWit control plane server
//!
//! REST API for batch runs, runtime settings and the run log.

use bitwit_core::{LogSink, SettingsStore, SimulatedPipeline};
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod error;
mod logging;
mod middleware;
mod routes;
mod state;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so the log format is known
    let config = Config::load()?;
    let log_level = logging::init(config.log_format)?;

    info!("bitwit-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory {:?}", config.data_dir);

    let settings = SettingsStore::open(&config.settings_path)?;
    if let Some(level) = settings.get().text("LOG_LEVEL")
        && let Err(e) = log_level.apply(level)
    {
        warn!(error = %e, "Failed to apply LOG_LEVEL");
    }
    let log = LogSink::open(&config.log_file, config.log_retain_lines)?;
    info!(lines = log.len(), path = ?config.log_file, "Run log ready");

    let bind = config.bind;
    let state = state::AppState::new(
        config,
        settings,
        log,
        Arc::new(SimulatedPipeline::new()),
        log_level,
    );
    let app = routes::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if state.orchestrator.reset() {
        info!("Abandoned running batch on shutdown");
    }
    info!("Shutting down...");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
