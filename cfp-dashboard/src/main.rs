//! cfp-dashboard - streaming session service
//!
//! Default mode serves the stream control surface. Two maintenance
//! subcommands work on record files:
//! - `import`: append CSV rows to a JSON-lines record list
//! - `simulate`: publish raw CSV rows to a broker topic on a cadence

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cfp_common::broker_client::BrokerClient;
use cfp_common::bus::Publisher;
use cfp_common::config::{DashboardConfig, TomlConfig};
use cfp_common::runtime::{init_tracing, shutdown_signal};
use cfp_common::types::RAW_DATA_TOPIC;
use cfp_common::SourceMode;
use cfp_dashboard::predictor::HttpPredictor;
use cfp_dashboard::source::{append_to_list, open_source, read_csv, FeatureSource, MemorySource};
use cfp_dashboard::{build_router, spawn_session, AppState, SessionConfig};

/// Command-line arguments for cfp-dashboard
#[derive(Parser, Debug)]
#[command(name = "cfp-dashboard")]
#[command(about = "Streaming failure prediction dashboard for CFP")]
#[command(version)]
struct Cli {
    /// TOML config file (default: <config_dir>/cfp/config.toml)
    #[arg(short, long, env = "CFP_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append rows from a CSV file to a record list
    Import {
        /// Source CSV with a header row
        #[arg(long)]
        csv: PathBuf,
        /// JSON-lines record list (created if missing)
        #[arg(long)]
        list: PathBuf,
    },
    /// Publish raw CSV rows to a broker topic without scoring
    Simulate {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = RAW_DATA_TOPIC)]
        topic: String,
        /// Seconds between rows
        #[arg(long, default_value_t = 5.0)]
        interval: f64,
        /// Broker base URL
        #[arg(long, env = "CFP_BROKER_URL")]
        broker_url: Option<String>,
    },
}

/// Overrides for the `[dashboard]` config section
#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(short, long, env = "CFP_DASHBOARD_BIND")]
    bind: Option<String>,

    /// Inference endpoint base URL
    #[arg(long, env = "CFP_API_URL")]
    api_url: Option<String>,

    /// Broker base URL
    #[arg(long, env = "CFP_BROKER_URL")]
    broker_url: Option<String>,

    /// Probabilities kept in the history window
    #[arg(long, env = "CFP_WINDOW_SIZE")]
    window_size: Option<usize>,

    /// Seconds between records
    #[arg(long, env = "CFP_TICK_INTERVAL")]
    tick_interval: Option<f64>,

    /// Seconds to wait for a scored record's broadcast
    #[arg(long, env = "CFP_MESSAGE_TIMEOUT")]
    message_timeout: Option<f64>,

    /// one-shot or cyclic
    #[arg(long, env = "CFP_SOURCE_MODE")]
    source_mode: Option<SourceMode>,

    /// CSV file or JSON-lines record list to stream from
    #[arg(long, env = "CFP_SOURCE_PATH")]
    source: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, config: &mut DashboardConfig) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(url) = self.api_url {
            config.api_url = url;
        }
        if let Some(url) = self.broker_url {
            config.broker_url = url;
        }
        if let Some(size) = self.window_size {
            config.window_size = size;
        }
        if let Some(secs) = self.tick_interval {
            config.tick_interval_secs = secs;
        }
        if let Some(secs) = self.message_timeout {
            config.message_timeout_secs = secs;
        }
        if let Some(mode) = self.source_mode {
            config.source_mode = mode;
        }
        if let Some(path) = self.source {
            config.source_path = Some(path);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TomlConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config.logging.level);

    match cli.command {
        Some(Command::Import { csv, list }) => import(csv, list).await,
        Some(Command::Simulate {
            csv,
            topic,
            interval,
            broker_url,
        }) => {
            let broker_url = broker_url.unwrap_or(config.dashboard.broker_url.clone());
            simulate(csv, topic, interval, broker_url).await
        }
        None => {
            let mut dashboard = config.dashboard;
            cli.serve.apply(&mut dashboard);
            serve(dashboard).await
        }
    }
}

async fn serve(config: DashboardConfig) -> Result<()> {
    info!("Starting CFP Dashboard (cfp-dashboard) v{}", env!("CARGO_PKG_VERSION"));
    config.validate().context("Invalid dashboard configuration")?;

    let source: Arc<dyn FeatureSource> = match &config.source_path {
        Some(path) => match open_source(config.source_mode, path).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Could not open source {}: {} - starting with no data", path.display(), e);
                Arc::new(MemorySource::empty())
            }
        },
        None => {
            warn!("No source configured - select one with POST /stream/source");
            Arc::new(MemorySource::empty())
        }
    };

    let predictor = HttpPredictor::new(&config.api_url, config.request_timeout())
        .context("Failed to create inference client")?;
    let subscriber = BrokerClient::new(config.broker_url.clone(), config.request_timeout())
        .context("Failed to create broker client")?;
    info!(
        "Inference at {}, broker at {}",
        predictor.predict_url(),
        subscriber.base_url()
    );

    let cancel = CancellationToken::new();
    let (session, session_task) = spawn_session(
        SessionConfig::from(&config),
        source,
        Arc::new(predictor),
        Arc::new(subscriber),
        cancel.clone(),
    );

    let app = build_router(AppState::new(session));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!("cfp-dashboard listening on http://{}", config.bind);
    info!("Health check: http://{}/health", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = session_task.await {
        warn!("Session task ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn import(csv: PathBuf, list: PathBuf) -> Result<()> {
    let parsed = read_csv(&csv).with_context(|| format!("Failed to read {}", csv.display()))?;
    let appended = append_to_list(&list, &parsed.records)
        .await
        .with_context(|| format!("Failed to append to {}", list.display()))?;

    info!(
        "Appended {} records to {} ({} rows skipped)",
        appended,
        list.display(),
        parsed.skipped
    );
    Ok(())
}

async fn simulate(csv: PathBuf, topic: String, interval: f64, broker_url: String) -> Result<()> {
    let parsed = read_csv(&csv).with_context(|| format!("Failed to read {}", csv.display()))?;
    let period = Duration::try_from_secs_f64(interval)
        .ok()
        .filter(|d| !d.is_zero())
        .context("interval must be a positive number of seconds")?;

    let publisher = BrokerClient::new(broker_url, Duration::from_secs(5))
        .context("Failed to create broker client")?;
    info!(
        "Publishing {} rows to {} at {} every {:?}",
        parsed.records.len(),
        topic,
        publisher.base_url(),
        period
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(period);

    for (row, record) in parsed.records.iter().enumerate() {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Simulation interrupted after {} rows", row);
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let payload = serde_json::to_string(record).context("Failed to encode row")?;
        match publisher.publish(&topic, payload).await {
            Ok(subscribers) => info!(row, subscribers, "Published raw row"),
            Err(e) => warn!(row, error = %e, "Publish failed"),
        }
    }

    info!("Simulation complete");
    Ok(())
}
