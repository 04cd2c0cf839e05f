// src/orchestrator/mod.rs
//! End-to-end run: server up, exchange, server down
//!
//! Stages:
//! 1. Allocate a free local port
//! 2. Launch the messaging server on it
//! 3. Settle, check the server survived, probe readiness
//! 4. Run the exchange under a fresh agent runtime
//! 5. Optionally linger with the server still up
//!
//! Cleanup (`terminate_all`) runs after the stages on every path, and a
//! result record is produced even when a stage fails.

pub mod shutdown;

pub use shutdown::ShutdownHook;

use crate::exchange::{Exchange, ExchangeConfig, ExchangeOutcome, ExchangeResult};
use crate::net::{find_available_port, ReadinessProbe};
use crate::observability::names;
use crate::runtime::agent_runtime::AgentRuntime;
use crate::runtime::message::Template;
use crate::runtime::process_supervisor::{LaunchCommand, ProcessSupervisor, TerminationSummary};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time allowed for an exited server's output to drain into the log buffer
const OUTPUT_DRAIN_DELAY: Duration = Duration::from_millis(100);

/// Everything one run needs, resolved from [`EngineConfig`]
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub launch: LaunchCommand,
    pub port_start: u16,
    pub port_range: u16,
    pub settle_delay: Duration,
    pub linger: Duration,
    pub readiness: ReadinessProbe,
    pub readiness_required: bool,
    pub exchange: ExchangeConfig,
    pub grace_period: Duration,
    pub handle_signals: bool,
}

impl From<&EngineConfig> for OrchestratorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            launch: LaunchCommand::new(config.server.command.as_str()).args(config.server.args.iter().cloned()),
            port_start: config.server.port_start,
            port_range: config.server.port_range,
            settle_delay: Duration::from_secs(config.server.settle_delay_secs),
            linger: Duration::from_secs(config.server.linger_secs),
            readiness: ReadinessProbe::new(
                config.readiness.max_attempts,
                Duration::from_millis(config.readiness.attempt_interval_ms),
                Duration::from_millis(config.readiness.connect_timeout_ms),
            ),
            readiness_required: config.readiness.required,
            exchange: ExchangeConfig::from(&config.exchange),
            grace_period: Duration::from_secs(config.supervisor.grace_period_secs),
            handle_signals: config.supervisor.handle_signals,
        }
    }
}

/// Record of a run plus the error that aborted it, if any
#[derive(Debug)]
pub struct OrchestrationOutcome {
    pub result: ExchangeResult,
    pub fatal: Option<EngineError>,
    pub cleanup: TerminationSummary,
}

impl OrchestrationOutcome {
    /// The record, or the fatal error now that cleanup is done
    pub fn into_result(self) -> Result<ExchangeResult> {
        match self.fatal {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// Facts gathered while the stages run
struct RunRecord {
    start_time: DateTime<Utc>,
    server_port: Option<u16>,
    server_pid: Option<u32>,
    server_started: bool,
    server_accessible: bool,
    exchange: Option<ExchangeOutcome>,
    recorded: Option<EngineError>,
    diagnostics: Vec<String>,
}

impl RunRecord {
    fn new() -> Self {
        Self {
            start_time: Utc::now(),
            server_port: None,
            server_pid: None,
            server_started: false,
            server_accessible: false,
            exchange: None,
            recorded: None,
            diagnostics: Vec::new(),
        }
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    supervisor: ProcessSupervisor,
    shutdown: CancellationToken,
    responder_template: Option<Template>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let supervisor = ProcessSupervisor::new(config.grace_period);
        Self {
            config,
            supervisor,
            shutdown: CancellationToken::new(),
            responder_template: None,
        }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(OrchestratorConfig::from(config))
    }

    /// Replace the filter the exchange's receiving side listens with
    pub fn with_responder_template(mut self, template: Template) -> Self {
        self.responder_template = Some(template);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Cancelling this token interrupts the run at its next suspension point
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Execute every stage, then clean up. Never skips cleanup.
    pub async fn run(&self) -> OrchestrationOutcome {
        let _hook = if self.config.handle_signals {
            match ShutdownHook::install(self.shutdown.clone()) {
                Ok(hook) => Some(hook),
                Err(e) => {
                    warn!(error = %e, "could not install shutdown hook");
                    None
                }
            }
        } else {
            None
        };

        let mut record = RunRecord::new();
        let staged = self.run_stages(&mut record).await;

        if let Some(pid) = record.server_pid {
            if record.diagnostics.is_empty() {
                record.diagnostics = self.supervisor.diagnostics(pid).await;
            }
        }

        let cleanup = self.supervisor.terminate_all().await;
        info!(
            terminated = cleanup.terminated,
            killed = cleanup.killed,
            already_exited = cleanup.already_exited,
            "cleanup complete"
        );

        let fatal = match staged {
            Ok(()) => None,
            Err(e) if !e.is_fatal() => {
                if record.recorded.is_none() {
                    record.recorded = Some(e);
                }
                None
            }
            Err(e) => {
                error!(error = %e, "orchestration failed");
                Some(e)
            }
        };

        let result = build_result(record, fatal.as_ref());
        metrics::counter!(names::RUNS, "outcome" => outcome_label(&result, fatal.as_ref())).increment(1);

        OrchestrationOutcome { result, fatal, cleanup }
    }

    async fn run_stages(&self, record: &mut RunRecord) -> Result<()> {
        let cfg = &self.config;

        let port = find_available_port(cfg.port_start, cfg.port_range)?;
        record.server_port = Some(port);
        info!(port, "port allocated");

        let process = self.supervisor.launch(&cfg.launch.with_port(port)).await?;
        record.server_pid = Some(process.pid);
        record.server_started = true;

        info!(pid = process.pid, settle_secs = cfg.settle_delay.as_secs_f64(), "waiting for server to settle");
        self.pause(cfg.settle_delay).await?;

        if !self.supervisor.is_alive(process.pid).await {
            tokio::time::sleep(OUTPUT_DRAIN_DELAY).await;
            let status = self
                .supervisor
                .exit_status(process.pid)
                .await
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string());
            record.diagnostics = self.supervisor.diagnostics(process.pid).await;
            record.server_started = false;
            return Err(EngineError::LaunchError(format!(
                "'{}' exited during startup ({})",
                process.command, status
            )));
        }

        let ready = tokio::select! {
            ready = cfg.readiness.await_ready(port) => ready,
            _ = self.shutdown.cancelled() => return Err(EngineError::Interrupted),
        };
        record.server_accessible = ready;

        if !ready {
            let err = EngineError::ReadinessTimeout {
                port,
                attempts: cfg.readiness.max_attempts,
            };
            if cfg.readiness_required {
                warn!(error = %err, "readiness required, run will be marked failed");
                record.recorded = Some(err);
            } else {
                warn!(error = %err, "continuing without confirmed readiness");
            }
        }

        let mut exchange = Exchange::new(cfg.exchange.clone());
        if let Some(template) = &self.responder_template {
            exchange = exchange.with_responder_template(template.clone());
        }

        let runtime = AgentRuntime::new();
        let outcome = exchange.run(&runtime, &self.shutdown).await;
        runtime.stop_all();

        let outcome = outcome?;
        let interrupted = outcome.interrupted;
        record.exchange = Some(outcome);
        if interrupted {
            return Err(EngineError::Interrupted);
        }

        if !cfg.linger.is_zero() {
            info!(linger_secs = cfg.linger.as_secs_f64(), "keeping server up");
            self.pause(cfg.linger).await?;
        }

        Ok(())
    }

    /// Cancellable sleep
    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.shutdown.cancelled() => Err(EngineError::Interrupted),
        }
    }
}

fn build_result(record: RunRecord, fatal: Option<&EngineError>) -> ExchangeResult {
    let end_time = Utc::now();

    let exchange_ok = record.exchange.as_ref().map(|o| o.success()).unwrap_or(false);
    let incomplete = record.exchange.as_ref().filter(|o| !o.success()).map(|o| EngineError::ExchangeIncomplete {
        sent: o.sent,
        received: o.received,
        expected: o.expected,
    });

    let error = fatal.or(record.recorded.as_ref()).or(incomplete.as_ref());
    let success = exchange_ok && error.is_none();

    let (exchange_started_at, exchange_finished_at, exchange_duration_seconds) = match &record.exchange {
        Some(o) => (Some(o.started_at), Some(o.finished_at), o.duration_seconds()),
        None => (None, None, 0.0),
    };

    let expected_messages = record
        .exchange
        .as_ref()
        .map(|o| o.expected)
        .unwrap_or_default();

    let (messages_sent, messages_received, message_history, agents) = match record.exchange {
        Some(o) => (o.sent, o.received, o.history, o.agents),
        None => (0, 0, Vec::new(), Vec::new()),
    };

    ExchangeResult {
        success,
        messages_sent,
        messages_received,
        expected_messages,
        start_time: record.start_time,
        end_time,
        exchange_started_at,
        exchange_finished_at,
        message_history,
        server_port: record.server_port,
        server_pid: record.server_pid,
        server_started: record.server_started,
        server_accessible: record.server_accessible,
        duration_seconds: (end_time - record.start_time).num_milliseconds() as f64 / 1000.0,
        exchange_duration_seconds,
        agents,
        error: error.map(|e| e.to_string()),
        error_kind: error.map(|e| e.kind()),
        server_diagnostics: record.diagnostics,
    }
}

fn outcome_label(result: &ExchangeResult, fatal: Option<&EngineError>) -> &'static str {
    match (fatal, result.success) {
        (Some(_), _) => "fatal",
        (None, true) => "success",
        (None, false) => "failed",
    }
}
