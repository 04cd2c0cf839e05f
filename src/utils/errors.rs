// src/utils/errors.rs
//! Error types for the orchestrator
//!
//! Failures fall into two groups:
//! - **Fatal**: the run could not happen at all (no port, server would not start,
//!   interrupted, unexpected failure). Reported after cleanup and re-raised.
//! - **Recorded**: the run happened but did not succeed (readiness timeout,
//!   incomplete exchange). Captured in the result record only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the orchestrator and its components
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no available port in {range} ports starting at {start}")]
    NoPortAvailable { start: u16, range: u16 },

    #[error("failed to launch server process: {0}")]
    LaunchError(String),

    #[error("server on port {port} not reachable after {attempts} attempts")]
    ReadinessTimeout { port: u16, attempts: u32 },

    #[error("exchange incomplete: sent {sent}, received {received}, expected {expected}")]
    ExchangeIncomplete { sent: u32, received: u32, expected: u32 },

    #[error("orchestration interrupted by shutdown signal")]
    Interrupted,

    #[error("orchestration failed: {0}")]
    Fatal(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("invalid agent state: {0}")]
    InvalidState(String),

    #[error("behaviour failed: {0}")]
    BehaviourFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Serializable classification of an [`EngineError`], carried in result records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoPortAvailable,
    LaunchError,
    ReadinessTimeout,
    ExchangeIncomplete,
    Interrupted,
    FatalOrchestrationError,
}

impl EngineError {
    /// Classify this error for the result record
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NoPortAvailable { .. } => ErrorKind::NoPortAvailable,
            EngineError::LaunchError(_) => ErrorKind::LaunchError,
            EngineError::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            EngineError::ExchangeIncomplete { .. } => ErrorKind::ExchangeIncomplete,
            EngineError::Interrupted => ErrorKind::Interrupted,
            _ => ErrorKind::FatalOrchestrationError,
        }
    }

    /// Whether this error means the run could not be carried out
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::ReadinessTimeout { .. } | EngineError::ExchangeIncomplete { .. }
        )
    }
}
