// src/observability/mod.rs
//! Tracing and metrics setup
//!
//! - **Tracing**: `tracing-subscriber` with an `EnvFilter` (`RUST_LOG` wins over
//!   the configured level), pretty or JSON output
//! - **Metrics**: `metrics` facade; a Prometheus scrape endpoint is installed
//!   only when `observability.metrics_listen` is set

use crate::utils::config::{LogFormat, ObservabilityConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Metric names
pub mod names {
    pub const MESSAGES_DELIVERED: &str = "exchange_messages_delivered_total";
    pub const MESSAGES_DROPPED: &str = "exchange_messages_dropped_total";
    pub const PINGS_SENT: &str = "exchange_pings_sent_total";
    pub const PINGS_RECEIVED: &str = "exchange_pings_received_total";
    pub const PROCESSES_LAUNCHED: &str = "supervisor_processes_launched_total";
    pub const PROCESSES_KILLED: &str = "supervisor_processes_killed_total";
    pub const READINESS_ATTEMPTS: &str = "readiness_probe_attempts_total";
    pub const EXCHANGE_DURATION: &str = "exchange_duration_seconds";
    pub const RUNS: &str = "orchestrator_runs_total";
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| EngineError::Config(format!("invalid log level '{}': {}", config.log_level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    installed.map_err(|e| EngineError::Config(format!("failed to install tracing subscriber: {}", e)))
}

/// Install the Prometheus exporter if configured
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(listen) = &config.metrics_listen else {
        return Ok(());
    };

    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| EngineError::Config(format!("invalid metrics_listen '{}': {}", listen, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Config(format!("failed to install metrics exporter: {}", e)))?;

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_by_default() {
        assert!(init_metrics(&ObservabilityConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_metrics_address() {
        let config = ObservabilityConfig {
            metrics_listen: Some("not-an-address".into()),
            ..Default::default()
        };
        assert!(matches!(init_metrics(&config), Err(EngineError::Config(_))));
    }
}
