// src/report/exporter.rs
//! Export a run's result record
//!
//! Supports:
//! - JSON (structured, for tooling)
//! - YAML (structured, human-editable)
//! - Text (the human-readable report)

use crate::exchange::result::{AgentRole, AgentTermination, Direction, ExchangeResult};
use crate::utils::errors::{EngineError, Result};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info};

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
    Text,
}

impl ExportFormat {
    /// Pick a format from a file extension; unknown extensions get JSON
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ExportFormat::Yaml,
            Some("txt") | Some("log") => ExportFormat::Text,
            _ => ExportFormat::Json,
        }
    }
}

/// Renders result records
pub struct Exporter {
    format: ExportFormat,
}

impl Exporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn export(&self, result: &ExchangeResult) -> Result<String> {
        debug!(
            "Exporting result ({} history entries) to {:?} format",
            result.message_history.len(),
            self.format
        );

        match self.format {
            ExportFormat::Json => serde_json::to_string_pretty(result)
                .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e))),
            ExportFormat::Yaml => serde_yaml::to_string(result)
                .map_err(|e| EngineError::ExportFailed(format!("YAML serialization error: {}", e))),
            ExportFormat::Text => Ok(render_text(result)),
        }
    }

    /// Render and write to `path`, creating parent directories
    pub fn write_to(&self, result: &ExchangeResult, path: &Path) -> Result<()> {
        let rendered = self.export(result)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, rendered)
            .map_err(|e| EngineError::ExportFailed(format!("cannot write {}: {}", path.display(), e)))?;

        info!("Result written to {}", path.display());
        Ok(())
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Human-readable report
pub fn render_text(result: &ExchangeResult) -> String {
    let mut out = String::new();
    // fmt::Write into a String cannot fail
    let _ = write_report(&mut out, result);
    out
}

fn write_report(out: &mut String, result: &ExchangeResult) -> std::fmt::Result {
    writeln!(out, "Exchange Orchestration Report")?;
    writeln!(out, "=============================")?;
    writeln!(out, "Overall success: {}", yes_no(result.success))?;
    writeln!(out)?;

    writeln!(out, "Server:")?;
    writeln!(out, "- Started: {}", yes_no(result.server_started))?;
    writeln!(out, "- Accessible: {}", yes_no(result.server_accessible))?;
    match result.server_port {
        Some(port) => writeln!(out, "- Port: {}", port)?,
        None => writeln!(out, "- Port: none")?,
    }
    if let Some(pid) = result.server_pid {
        writeln!(out, "- PID: {}", pid)?;
    }
    writeln!(out)?;

    writeln!(out, "Exchange:")?;
    writeln!(out, "- Messages sent: {}", result.messages_sent)?;
    writeln!(out, "- Messages received: {}", result.messages_received)?;
    writeln!(out, "- Expected messages: {}", result.expected_messages)?;
    writeln!(out, "- Exchange duration: {:.2} seconds", result.exchange_duration_seconds)?;

    for agent in &result.agents {
        let role = match agent.role {
            AgentRole::Sender => "sender",
            AgentRole::Responder => "responder",
            AgentRole::SelfProbe => "self-probe",
        };
        let termination = match agent.termination {
            AgentTermination::Completed => "completed",
            AgentTermination::Silence => "silence",
            AgentTermination::Interrupted => "interrupted",
        };
        writeln!(
            out,
            "- Agent {} ({}): sent {}, received {}, ended by {}",
            agent.address, role, agent.messages_sent, agent.messages_received, termination
        )?;
    }
    writeln!(out)?;

    if !result.message_history.is_empty() {
        writeln!(out, "History:")?;
        for entry in &result.message_history {
            let arrow = match entry.direction {
                Direction::Sent => "->",
                Direction::Received => "<-",
            };
            writeln!(
                out,
                "  {} {} {} {}: {}",
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.agent,
                arrow,
                entry.peer,
                entry.payload
            )?;
        }
        writeln!(out)?;
    }

    if let Some(error) = &result.error {
        writeln!(out, "Error: {}", error)?;
    }
    if !result.server_diagnostics.is_empty() {
        writeln!(out, "Server output (tail):")?;
        for line in &result.server_diagnostics {
            writeln!(out, "  | {}", line)?;
        }
    }

    writeln!(out, "Total duration: {:.2} seconds", result.duration_seconds)?;
    writeln!(out, "Finished at: {}", result.end_time.to_rfc3339())?;
    writeln!(out, "Final result: {}", if result.success { "SUCCESS" } else { "FAILED" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::result::{AgentSummary, HistoryEntry};
    use crate::runtime::agent_runtime::AgentState;
    use crate::runtime::message::Address;
    use crate::utils::errors::ErrorKind;
    use chrono::Utc;

    fn sample() -> ExchangeResult {
        let ping = Address::from("ping@localhost");
        let pong = Address::from("pong@localhost");
        let now = Utc::now();

        ExchangeResult {
            success: false,
            messages_sent: 2,
            messages_received: 1,
            expected_messages: 2,
            start_time: now,
            end_time: now,
            exchange_started_at: Some(now),
            exchange_finished_at: Some(now),
            message_history: vec![
                HistoryEntry::sent(&ping, &pong, "ping_0"),
                HistoryEntry::received(&pong, &ping, "ping_0"),
                HistoryEntry::sent(&ping, &pong, "ping_1"),
            ],
            server_port: Some(5222),
            server_pid: Some(4242),
            server_started: true,
            server_accessible: false,
            duration_seconds: 12.5,
            exchange_duration_seconds: 4.0,
            agents: vec![AgentSummary {
                address: ping,
                role: AgentRole::Sender,
                messages_sent: 2,
                messages_received: 0,
                state: AgentState::Stopped,
                termination: AgentTermination::Completed,
            }],
            error: Some("exchange incomplete: sent 2, received 1, expected 2".into()),
            error_kind: Some(ErrorKind::ExchangeIncomplete),
            server_diagnostics: vec!["listening".into()],
        }
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("out/result.yaml")), ExportFormat::Yaml);
        assert_eq!(ExportFormat::from_path(Path::new("report.txt")), ExportFormat::Text);
        assert_eq!(ExportFormat::from_path(Path::new("result.json")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("result")), ExportFormat::Json);
    }

    #[test]
    fn test_json_export() {
        let json = Exporter::new(ExportFormat::Json).export(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["messages_sent"], 2);
        assert_eq!(value["error_kind"], "exchange_incomplete");
        assert_eq!(value["message_history"][1]["direction"], "received");
        assert_eq!(value["agents"][0]["termination"], "completed");
    }

    #[test]
    fn test_yaml_export() {
        let yaml = Exporter::new(ExportFormat::Yaml).export(&sample()).unwrap();
        let parsed: ExchangeResult = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server_port, Some(5222));
        assert_eq!(parsed.message_history.len(), 3);
    }

    #[test]
    fn test_text_report() {
        let text = render_text(&sample());

        assert!(text.contains("Overall success: no"));
        assert!(text.contains("- Port: 5222"));
        assert!(text.contains("ping@localhost -> pong@localhost: ping_1"));
        assert!(text.contains("Error: exchange incomplete"));
        assert!(text.contains("  | listening"));
        assert!(text.ends_with("Final result: FAILED\n"));
    }

    #[test]
    fn test_write_to_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/result.json");

        Exporter::new(ExportFormat::from_path(&path))
            .write_to(&sample(), &path)
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"server_pid\": 4242"));
    }
}
