use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use taskline_gateway::auth::{JwtVerifier, SharedVerifier};
use taskline_gateway::config::{Cli, GatewayConfig};
use taskline_gateway::server::{build_router, AppState};
use taskline_gateway::store::{MemoryNotificationStore, SharedStore};
use taskline_gateway::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;
    let cli = Cli::parse();
    let config = GatewayConfig::try_from(cli)?;
    run(config, telemetry).await
}

async fn run(config: GatewayConfig, telemetry: Telemetry) -> Result<()> {
    let verifier: SharedVerifier = Arc::new(JwtVerifier::new(&config.auth_secret));
    let store: SharedStore = Arc::new(MemoryNotificationStore::new());
    let state = AppState::new(
        Arc::new(config.clone()),
        verifier,
        store,
        Some(telemetry.metrics_handle()),
    );

    let sweeper = state
        .registry
        .spawn_sweeper(config.heartbeat_sweep_interval, config.idle_timeout);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %listener.local_addr()?, "taskline gateway listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    // Let in-flight close frames drain before the process exits.
    tokio::time::sleep(config.shutdown_grace).await;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
