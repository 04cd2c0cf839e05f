// src/main.rs
//! Exchange Orchestrator
//!
//! Launches the configured messaging server, runs the agent exchange against
//! it, prints the report and always stops the server before exiting.
//!
//! Exit status: 0 on success, 2 when the run completed but failed, 1 when it
//! could not be carried out.

use anyhow::{Context, Result};
use exchange_orchestrator::observability::{init_metrics, init_tracing};
use exchange_orchestrator::report::{render_text, ExportFormat, Exporter};
use exchange_orchestrator::{BuildInfo, EngineConfig, Orchestrator};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let config = EngineConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    let build = BuildInfo::current();
    info!(
        "Starting Exchange Orchestrator v{} ({}, built {} with {})",
        build.version, build.git_hash, build.build_timestamp, build.rustc_version
    );
    debug!("Configuration loaded: {:?}", config);

    let orchestrator = Orchestrator::from_engine_config(&config);
    let outcome = orchestrator.run().await;

    println!("{}", render_text(&outcome.result));

    if let Some(path) = &config.output.result_path {
        if let Err(e) = Exporter::new(ExportFormat::from_path(path)).write_to(&outcome.result, path) {
            error!("Failed to write result record: {}", e);
        }
    }
    if let Some(path) = &config.output.report_path {
        if let Err(e) = Exporter::new(ExportFormat::Text).write_to(&outcome.result, path) {
            error!("Failed to write report: {}", e);
        }
    }

    let result = outcome.into_result().context("orchestration aborted")?;

    if result.success {
        info!(
            "Exchange completed: {}/{} messages in {:.2}s",
            result.messages_received, result.expected_messages, result.duration_seconds
        );
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(
            "Exchange failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        Ok(ExitCode::from(2))
    }
}
