// src/utils/mod.rs
//! Configuration and error types shared across the crate

pub mod config;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, ErrorKind, Result};
