//! Geo Prize Server
//!
//! Admin-authorized prize distribution for on-chain geography competitions

use std::sync::Arc;

use geo_prize::config::Config;
use geo_prize::server::{run_server, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Geo Prize Server");

    let config = Config::load()?;
    info!(
        "Loaded configuration ({} contract(s), {} default tier(s))",
        config.contracts.len(),
        config.prizes.tiers.len()
    );

    let state = Arc::new(AppState::from_config(&config).await?);
    let (host, port) = config.bind_address();

    run_server(&host, port, state).await?;

    Ok(())
}
