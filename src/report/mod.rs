// src/report/mod.rs
//! Result reporting

pub mod exporter;

pub use exporter::{render_text, ExportFormat, Exporter};
