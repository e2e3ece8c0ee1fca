//! # Herald Server
//!
//! Authorized channel broadcast gateway.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (herald.toml if present)
//! herald
//!
//! # Run with environment variables
//! HERALD_PORT=6001 HERALD_HOST=0.0.0.0 herald
//! ```

mod auth;
mod bus;
mod config;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use herald_core::{
    Authorizer, ChannelCoordinator, LocalDirectory, MemoryBus, PatternMatcher,
    PublicOnlyAuthorizer, SubscriptionBridge,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load()?;

    let default_filter = if config.dev_mode {
        "herald=debug,herald_core=debug"
    } else {
        "herald=info,herald_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Herald server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    let coordinator_config = config.coordinator();
    let directory = Arc::new(LocalDirectory::with_config(config.directory()));

    let authorizer: Arc<dyn Authorizer> = match config.auth.url() {
        Some(url) => {
            tracing::info!(url = %url, "Authorizing joins over HTTP");
            Arc::new(auth::HttpAuthorizer::new(url, config.auth.timeout())?)
        }
        None => {
            tracing::warn!("No auth host configured, only public channels can be joined");
            Arc::new(PublicOnlyAuthorizer::new(PatternMatcher::new(
                &coordinator_config.patterns,
            )))
        }
    };

    let bridge = SubscriptionBridge::new(config.bus.world.clone(), directory.clone());
    let (bridge, inbound) = match &config.bus.redis_url {
        Some(url) => {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let redis = Arc::new(bus::RedisBus::new(url).context("Invalid redis URL")?);
            redis.spawn_reader(tx);
            tracing::info!(world = %bridge.world(), "Using redis bus");
            (bridge.with_bus(redis), rx)
        }
        None => {
            let (memory, rx) = MemoryBus::new();
            tracing::info!("Using in-process bus");
            (bridge.with_bus(Arc::new(memory)), rx)
        }
    };
    let bridge = Arc::new(bridge);
    tokio::spawn(bridge.clone().run(inbound, metrics::record_bridged));

    let coordinator = Arc::new(ChannelCoordinator::new(
        &coordinator_config,
        directory.clone(),
        authorizer,
        bridge,
    ));

    let state = Arc::new(handlers::AppState {
        directory,
        coordinator,
        config,
    });

    handlers::run_server(state).await?;

    Ok(())
}
