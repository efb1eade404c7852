//! cfp-api - Inference Endpoint service
//!
//! Loads the model once, then serves `POST /predict` and publishes every
//! scored result to the broker's predictions topic.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cfp_api::{build_router, AppState, LogisticModel, Scorer};
use cfp_common::broker_client::BrokerClient;
use cfp_common::config::TomlConfig;
use cfp_common::runtime::{init_tracing, shutdown_signal};

/// Command-line arguments for cfp-api
#[derive(Parser, Debug)]
#[command(name = "cfp-api")]
#[command(about = "Failure prediction inference endpoint for CFP")]
#[command(version)]
struct Args {
    /// TOML config file (default: <config_dir>/cfp/config.toml)
    #[arg(short, long, env = "CFP_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "CFP_API_BIND")]
    bind: Option<String>,

    /// Model artifact (JSON)
    #[arg(short, long, env = "CFP_MODEL_PATH")]
    model: Option<PathBuf>,

    /// Broker base URL
    #[arg(long, env = "CFP_BROKER_URL")]
    broker_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config.logging.level);
    info!("Starting CFP Inference API (cfp-api) v{}", env!("CARGO_PKG_VERSION"));

    let api = config.api;
    let bind = args.bind.unwrap_or(api.bind.clone());
    let model_path = args.model.unwrap_or(api.model_path.clone());
    let broker_url = args.broker_url.unwrap_or(api.broker_url.clone());

    // No model, no service: exit before binding
    let model = LogisticModel::load(&model_path)
        .with_context(|| format!("Failed to load model from {}", model_path.display()))?;
    info!("Model {} ready", model.version());

    let publisher = BrokerClient::new(broker_url, api.publish_timeout())
        .context("Failed to create broker client")?;
    info!("Publishing predictions via broker at {}", publisher.base_url());

    let app = build_router(AppState::new(Arc::new(model), Arc::new(publisher)));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("cfp-api listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
