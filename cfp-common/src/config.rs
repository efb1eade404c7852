//! Configuration loading
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority, handled by each binary's clap args)
//! 2. Environment variable (`CFP_*`, also via clap)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing default config file is not an error: a warning is logged and
//! compiled defaults are used. An explicitly requested file must exist.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::bus::DEFAULT_BUFFER_CAPACITY;
use crate::types::{SourceMode, DEFAULT_WINDOW_SIZE};
use crate::{Error, Result};

/// Top-level TOML file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub broker: BrokerConfig,
    pub api: ApiConfig,
    pub dashboard: DashboardConfig,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[broker]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub bind: String,
    /// Messages buffered per subscriber before the oldest are dropped
    pub buffer_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5750".to_string(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// `[api]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// Model artifact loaded once at startup
    pub model_path: PathBuf,
    pub broker_url: String,
    pub publish_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5751".to_string(),
            model_path: PathBuf::from("models/failure_model.json"),
            broker_url: "http://127.0.0.1:5750".to_string(),
            publish_timeout_ms: 2000,
        }
    }
}

impl ApiConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// `[dashboard]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub bind: String,
    pub api_url: String,
    pub broker_url: String,
    /// Probabilities retained in the history window
    pub window_size: usize,
    /// Seconds between rows
    pub tick_interval_secs: f64,
    /// Seconds to wait for the broadcast of a scored row
    pub message_timeout_secs: f64,
    pub source_mode: SourceMode,
    /// CSV file (one-shot) or JSON-lines list (cyclic)
    pub source_path: Option<PathBuf>,
    pub request_timeout_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5752".to_string(),
            api_url: "http://127.0.0.1:5751".to_string(),
            broker_url: "http://127.0.0.1:5750".to_string(),
            window_size: DEFAULT_WINDOW_SIZE,
            tick_interval_secs: 3.0,
            message_timeout_secs: 3.0,
            source_mode: SourceMode::OneShot,
            source_path: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl DashboardConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval_secs)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.message_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::Config("window_size must be at least 1".to_string()));
        }
        if !(self.tick_interval_secs.is_finite() && self.tick_interval_secs > 0.0) {
            return Err(Error::Config(format!(
                "tick_interval_secs must be positive, got {}",
                self.tick_interval_secs
            )));
        }
        if !(self.message_timeout_secs.is_finite() && self.message_timeout_secs > 0.0) {
            return Err(Error::Config(format!(
                "message_timeout_secs must be positive, got {}",
                self.message_timeout_secs
            )));
        }
        Ok(())
    }
}

impl TomlConfig {
    /// Load configuration
    ///
    /// `explicit` comes from `--config`/`CFP_CONFIG`; when absent the platform
    /// default path is tried and a missing file falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load_file(&path),
            Some(path) => {
                warn!(
                    "Config file not found at {} - using compiled defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory - using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read {} failed: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }
}

/// `<config_dir>/cfp/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cfp").join("config.toml"))
}
