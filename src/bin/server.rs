// Entry point for the event-stream relay server

use anyhow::Context;
use streamrelay::api::{AppState, router};
use streamrelay::core::config::AppConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    streamrelay::setup_logging();

    let config = AppConfig::from_env().map_err(|e| {
        error!("Config error: {}", e);
        anyhow::anyhow!(e)
    })?;
    let bind_addr = config.bind_addr;

    let state = AppState::from_config(config).context("Failed to initialize upstream client")?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "Relay server listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
