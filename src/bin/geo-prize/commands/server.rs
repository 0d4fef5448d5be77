//! Server command - run the HTTP service

use std::sync::Arc;

use anyhow::Result;
use geo_prize::config::Config;
use geo_prize::server::{run_server, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub async fn run(config: &Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = Arc::new(AppState::from_config(config).await?);
    let (host, port) = config.bind_address();
    info!(
        "Serving {} contract(s) on {}",
        config.contracts.len(),
        state.network
    );

    run_server(&host, port, state).await
}
