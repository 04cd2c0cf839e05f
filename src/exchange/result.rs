// src/exchange/result.rs
//! Records produced by an exchange run

use crate::runtime::agent_runtime::AgentState;
use crate::runtime::message::Address;
use crate::utils::errors::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a history entry relative to the recording agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// One message as seen by one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub direction: Direction,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    pub agent: Address,
    pub peer: Address,
}

impl HistoryEntry {
    pub fn sent(agent: &Address, peer: &Address, payload: impl Into<String>) -> Self {
        Self {
            direction: Direction::Sent,
            payload: payload.into(),
            timestamp: Utc::now(),
            agent: agent.clone(),
            peer: peer.clone(),
        }
    }

    pub fn received(agent: &Address, peer: &Address, payload: impl Into<String>) -> Self {
        Self {
            direction: Direction::Received,
            payload: payload.into(),
            timestamp: Utc::now(),
            agent: agent.clone(),
            peer: peer.clone(),
        }
    }
}

/// Part an agent played in the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Sender,
    Responder,
    SelfProbe,
}

/// Why an agent's exchange behaviour ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTermination {
    /// Reached its message budget
    Completed,
    /// Receive timed out with nothing pending
    Silence,
    /// Stopped from outside
    Interrupted,
}

/// Per-agent statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub address: Address,
    pub role: AgentRole,
    pub messages_sent: u32,
    pub messages_received: u32,
    pub state: AgentState,
    pub termination: AgentTermination,
}

/// Final record of an orchestration run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResult {
    pub success: bool,
    pub messages_sent: u32,
    pub messages_received: u32,
    pub expected_messages: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub exchange_started_at: Option<DateTime<Utc>>,
    pub exchange_finished_at: Option<DateTime<Utc>>,
    pub message_history: Vec<HistoryEntry>,
    pub server_port: Option<u16>,
    pub server_pid: Option<u32>,
    pub server_started: bool,
    pub server_accessible: bool,
    pub duration_seconds: f64,
    pub exchange_duration_seconds: f64,
    pub agents: Vec<AgentSummary>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub server_diagnostics: Vec<String>,
}

impl ExchangeResult {
    pub fn agent(&self, role: AgentRole) -> Option<&AgentSummary> {
        self.agents.iter().find(|a| a.role == role)
    }

    pub fn sent_entries(&self) -> usize {
        self.message_history
            .iter()
            .filter(|e| e.direction == Direction::Sent)
            .count()
    }

    pub fn received_entries(&self) -> usize {
        self.message_history
            .iter()
            .filter(|e| e.direction == Direction::Received)
            .count()
    }
}
