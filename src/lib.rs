// src/lib.rs
//! Exchange Orchestrator Library
//!
//! Starts an external messaging server, waits for it to accept TCP
//! connections, runs a bounded two-agent message exchange against it and
//! tears everything down again, whatever happened in between.
//!
//! # Architecture
//!
//! - **net**: free-port discovery and TCP readiness probing
//! - **runtime**: cooperative agent runtime and the child-process supervisor
//! - **exchange**: ping/pong and self-probe behaviours, result records
//! - **orchestrator**: the staged run with guaranteed cleanup
//! - **report**: JSON/YAML/text rendering of result records
//! - **observability**: tracing subscriber and metrics exporter setup
//! - **utils**: configuration and error types

pub mod exchange;
pub mod net;
pub mod observability;
pub mod orchestrator;
pub mod report;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use exchange::{Exchange, ExchangeConfig, ExchangeMode, ExchangeOutcome, ExchangeResult};
pub use orchestrator::{OrchestrationOutcome, Orchestrator, OrchestratorConfig};
pub use runtime::agent_runtime::AgentRuntime;
pub use runtime::process_supervisor::ProcessSupervisor;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, ErrorKind, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
