// src/utils/config.rs
//! Layered configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults (serde `default`)
//! 2. Config file: `$ORCH_CONFIG` if set, otherwise `config/exchange.{toml,yaml,json}` (optional)
//! 3. Environment: `ORCH_<SECTION>__<KEY>`, e.g. `ORCH_EXCHANGE__MAX_MESSAGES=5`

use crate::exchange::ExchangeMode;
use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "ORCH_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub readiness: ReadinessConfig,
    pub exchange: ExchangeSettings,
    pub supervisor: SupervisorConfig,
    pub observability: ObservabilityConfig,
    pub output: OutputConfig,
}

/// Messaging server launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Executable name or path
    pub command: String,

    /// Arguments; `{port}` is replaced with the allocated port
    pub args: Vec<String>,

    /// First port of the scan range
    pub port_start: u16,

    /// Number of ports to scan
    pub port_range: u16,

    /// Wait after launch before probing
    pub settle_delay_secs: u64,

    /// Keep the server up this long after the exchange
    pub linger_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "spade".to_string(),
            args: vec!["run".to_string()],
            port_start: 5222,
            port_range: 100,
            settle_delay_secs: 8,
            linger_secs: 0,
        }
    }
}

/// TCP readiness probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub attempt_interval_ms: u64,
    pub connect_timeout_ms: u64,

    /// A negative probe fails the run (still runs the exchange and cleanup)
    pub required: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            attempt_interval_ms: 2000,
            connect_timeout_ms: 2000,
            required: false,
        }
    }
}

/// Exchange protocol parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub max_messages: u32,
    pub inter_message_delay_secs: u64,
    pub receive_timeout_secs: u64,
    pub mode: ExchangeMode,
    pub conversation_id: String,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            inter_message_delay_secs: 2,
            receive_timeout_secs: 30,
            mode: ExchangeMode::PingPong,
            conversation_id: "ping-pong".to_string(),
        }
    }
}

/// Process supervision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Time between SIGTERM and SIGKILL
    pub grace_period_secs: u64,

    /// Whether SIGINT/SIGTERM to this process cancel the run
    pub handle_signals: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
            handle_signals: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub log_level: String,
    pub log_format: LogFormat,

    /// Prometheus scrape address, e.g. `127.0.0.1:9000`
    pub metrics_listen: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_listen: None,
        }
    }
}

/// Where the binary writes the result record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Structured record destination (format from the extension; `.yaml`/`.yml` or JSON)
    pub result_path: Option<PathBuf>,

    /// Human-readable report destination
    pub report_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from defaults, file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load configuration using an explicit file (required when given)
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                builder.add_source(File::from(path).required(true))
            }
            None => builder.add_source(File::with_name("config/exchange").required(false)),
        };

        let config: EngineConfig = builder
            .add_source(
                Environment::with_prefix("ORCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the orchestrator cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.server.command.trim().is_empty() {
            return Err(EngineError::Config("server.command cannot be empty".into()));
        }
        if self.server.port_range == 0 {
            return Err(EngineError::Config("server.port_range must be at least 1".into()));
        }
        if self.readiness.max_attempts == 0 {
            return Err(EngineError::Config("readiness.max_attempts must be at least 1".into()));
        }
        if self.exchange.max_messages == 0 {
            return Err(EngineError::Config("exchange.max_messages must be at least 1".into()));
        }
        if self.exchange.receive_timeout_secs <= self.exchange.inter_message_delay_secs {
            return Err(EngineError::Config(format!(
                "exchange.receive_timeout_secs ({}) must exceed inter_message_delay_secs ({})",
                self.exchange.receive_timeout_secs, self.exchange.inter_message_delay_secs
            )));
        }
        Ok(())
    }
}
