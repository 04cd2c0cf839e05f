// src/exchange/mod.rs
//! Bounded message exchange between agents
//!
//! Two modes:
//! - **PingPong**: a sender and a responder agent, `max_messages` round trips
//! - **SelfProbe**: one agent sending to itself, a loopback sanity check
//!
//! Both terminate on their own. The sender spends its budget, the receiving
//! side stops after `receive_timeout` of silence, and an external cancel
//! stops every agent at its next suspension point.

pub mod ping_pong;
pub mod result;
pub mod self_probe;

pub use ping_pong::{PingBehaviour, PongBehaviour};
pub use result::{AgentRole, AgentSummary, AgentTermination, Direction, ExchangeResult, HistoryEntry};
pub use self_probe::{ProbeReceiver, ProbeSender};

use crate::observability::names;
use crate::runtime::agent_runtime::{AgentRuntime, AgentState};
use crate::runtime::message::{Address, Template};
use crate::utils::config::ExchangeSettings;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use futures::future::try_join;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const SENDER_ADDRESS: &str = "ping@localhost";
pub const RESPONDER_ADDRESS: &str = "pong@localhost";
pub const PROBE_ADDRESS: &str = "probe@localhost";

/// Exchange variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeMode {
    #[default]
    PingPong,
    SelfProbe,
}

/// Runtime parameters of one exchange
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub mode: ExchangeMode,
    pub max_messages: u32,
    pub inter_message_delay: Duration,
    pub receive_timeout: Duration,
    pub conversation_id: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self::from(&ExchangeSettings::default())
    }
}

impl From<&ExchangeSettings> for ExchangeConfig {
    fn from(settings: &ExchangeSettings) -> Self {
        Self {
            mode: settings.mode,
            max_messages: settings.max_messages,
            inter_message_delay: Duration::from_secs(settings.inter_message_delay_secs),
            receive_timeout: Duration::from_secs(settings.receive_timeout_secs),
            conversation_id: settings.conversation_id.clone(),
        }
    }
}

/// What an exchange produced
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub mode: ExchangeMode,
    pub expected: u32,
    pub sent: u32,
    pub received: u32,
    /// Merged across agents, ordered by timestamp
    pub history: Vec<HistoryEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub agents: Vec<AgentSummary>,
    pub interrupted: bool,
}

impl ExchangeOutcome {
    pub fn success(&self) -> bool {
        self.sent == self.expected && self.received == self.expected
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// One exchange over an agent runtime
pub struct Exchange {
    config: ExchangeConfig,
    responder_template: Option<Template>,
}

impl Exchange {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            config,
            responder_template: None,
        }
    }

    /// Replace the filter the receiving side listens with
    pub fn with_responder_template(mut self, template: Template) -> Self {
        self.responder_template = Some(template);
        self
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Register the agents, run the exchange to completion and collect the outcome.
    ///
    /// Cancelling `cancel` stops every agent; counts gathered so far are kept.
    pub async fn run(&self, runtime: &AgentRuntime, cancel: &CancellationToken) -> Result<ExchangeOutcome> {
        if self.config.max_messages == 0 {
            return Err(EngineError::Config("exchange.max_messages must be at least 1".into()));
        }

        info!(
            mode = ?self.config.mode,
            max_messages = self.config.max_messages,
            "starting exchange"
        );

        let outcome = match self.config.mode {
            ExchangeMode::PingPong => self.run_ping_pong(runtime, cancel).await,
            ExchangeMode::SelfProbe => self.run_self_probe(runtime, cancel).await,
        };

        if outcome.is_err() {
            runtime.stop_all();
        }

        let outcome = outcome?;
        metrics::histogram!(names::EXCHANGE_DURATION).record(outcome.duration_seconds());
        info!(
            sent = outcome.sent,
            received = outcome.received,
            expected = outcome.expected,
            interrupted = outcome.interrupted,
            "exchange finished"
        );
        Ok(outcome)
    }

    async fn run_ping_pong(&self, runtime: &AgentRuntime, cancel: &CancellationToken) -> Result<ExchangeOutcome> {
        let cfg = &self.config;
        let sender = runtime.register(SENDER_ADDRESS)?;
        let responder = runtime.register(RESPONDER_ADDRESS)?;

        let template = self
            .responder_template
            .clone()
            .unwrap_or_else(|| PongBehaviour::template(cfg.conversation_id.as_str()));

        let pong = runtime.add_behaviour(&responder, PongBehaviour::new(cfg.receive_timeout), Some(template))?;
        let ping = runtime.add_behaviour(
            &sender,
            PingBehaviour::new(
                responder.clone(),
                cfg.conversation_id.as_str(),
                cfg.max_messages,
                cfg.inter_message_delay,
            ),
            None,
        )?;

        let started_at = Utc::now();
        runtime.start(&responder)?;
        runtime.start(&sender)?;

        let (ping, pong) = until_done(runtime, cancel, try_join(ping.join(), pong.join())).await?;
        let finished_at = Utc::now();

        let mut history = ping.history;
        history.extend(pong.history);
        history.sort_by_key(|entry| entry.timestamp);

        let agents = vec![
            summary(runtime, &sender, AgentRole::Sender, ping.count_sent, 0, ping.termination),
            summary(runtime, &responder, AgentRole::Responder, 0, pong.count_received, pong.termination),
        ];

        Ok(ExchangeOutcome {
            mode: cfg.mode,
            expected: cfg.max_messages,
            sent: ping.count_sent,
            received: pong.count_received,
            history,
            started_at: ping.started_at.unwrap_or(started_at),
            finished_at,
            agents,
            interrupted: cancel.is_cancelled(),
        })
    }

    async fn run_self_probe(&self, runtime: &AgentRuntime, cancel: &CancellationToken) -> Result<ExchangeOutcome> {
        let cfg = &self.config;
        let probe = runtime.register(PROBE_ADDRESS)?;
        let sent = Arc::new(AtomicU32::new(0));

        let template = self
            .responder_template
            .clone()
            .unwrap_or_else(|| ProbeReceiver::template(cfg.conversation_id.as_str()));

        let receiver = runtime.add_behaviour(
            &probe,
            ProbeReceiver::new(cfg.max_messages, cfg.receive_timeout, Arc::clone(&sent)),
            Some(template),
        )?;
        let sender = runtime.add_behaviour(
            &probe,
            ProbeSender::new(
                cfg.conversation_id.as_str(),
                cfg.max_messages,
                cfg.inter_message_delay,
                Arc::clone(&sent),
            ),
            None,
        )?;

        let started_at = Utc::now();
        runtime.start(&probe)?;

        let (sender, receiver) = until_done(runtime, cancel, try_join(sender.join(), receiver.join())).await?;
        let finished_at = Utc::now();

        let count_sent = sender.count_sent();
        let mut history = sender.history;
        history.extend(receiver.history);
        history.sort_by_key(|entry| entry.timestamp);

        let agents = vec![summary(
            runtime,
            &probe,
            AgentRole::SelfProbe,
            count_sent,
            receiver.count_received,
            receiver.termination,
        )];

        Ok(ExchangeOutcome {
            mode: cfg.mode,
            expected: cfg.max_messages,
            sent: count_sent,
            received: receiver.count_received,
            history,
            started_at,
            finished_at,
            agents,
            interrupted: cancel.is_cancelled(),
        })
    }
}

/// Await `joined`, stopping every agent first if `cancel` fires
async fn until_done<T, F>(runtime: &AgentRuntime, cancel: &CancellationToken, joined: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::pin!(joined);

    let finished = tokio::select! {
        result = &mut joined => Some(result),
        _ = cancel.cancelled() => None,
    };

    match finished {
        Some(result) => result,
        None => {
            warn!("exchange interrupted, stopping agents");
            runtime.stop_all();
            joined.await
        }
    }
}

fn summary(
    runtime: &AgentRuntime,
    address: &Address,
    role: AgentRole,
    messages_sent: u32,
    messages_received: u32,
    termination: AgentTermination,
) -> AgentSummary {
    AgentSummary {
        address: address.clone(),
        role,
        messages_sent,
        messages_received,
        state: runtime.state(address).unwrap_or(AgentState::Stopped),
        termination,
    }
}
