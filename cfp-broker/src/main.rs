//! cfp-broker - Broadcast Channel service
//!
//! Fans out opaque messages on named topics to every SSE subscriber that is
//! connected at publish time.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cfp_common::bus::TopicBus;
use cfp_common::config::TomlConfig;
use cfp_common::runtime::{init_tracing, shutdown_signal};
use cfp_broker::{build_router, AppState};

/// Command-line arguments for cfp-broker
#[derive(Parser, Debug)]
#[command(name = "cfp-broker")]
#[command(about = "Broadcast channel service for CFP")]
#[command(version)]
struct Args {
    /// TOML config file (default: <config_dir>/cfp/config.toml)
    #[arg(short, long, env = "CFP_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "CFP_BROKER_BIND")]
    bind: Option<String>,

    /// Messages buffered per subscriber before the oldest are dropped
    #[arg(long, env = "CFP_BROKER_BUFFER_CAPACITY")]
    buffer_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config.logging.level);
    info!("Starting CFP Broker (cfp-broker) v{}", env!("CARGO_PKG_VERSION"));

    let bind = args.bind.unwrap_or(config.broker.bind);
    let buffer_capacity = args.buffer_capacity.unwrap_or(config.broker.buffer_capacity);

    let bus = TopicBus::new(buffer_capacity);
    info!("Topic bus initialized with per-subscriber capacity {}", bus.capacity());

    let app = build_router(AppState::new(bus));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("cfp-broker listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
