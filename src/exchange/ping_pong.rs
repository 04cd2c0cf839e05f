// src/exchange/ping_pong.rs
//! Two-agent exchange: a sender pings, a responder answers each ping
//!
//! The sender stops after `max_messages` pings. The responder stops after a
//! receive times out, which is how it learns the sender has gone quiet.

use crate::exchange::result::{AgentTermination, HistoryEntry};
use crate::observability::names;
use crate::runtime::behaviour::{Behaviour, BehaviourContext, BehaviourKind};
use crate::runtime::message::{Address, Message, Performative, Template};
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

/// Sender role: sends `ping_<n>` until its budget is spent
pub struct PingBehaviour {
    peer: Address,
    conversation_id: String,
    max_messages: u32,
    delay: Duration,

    pub count_sent: u32,
    pub history: Vec<HistoryEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub termination: AgentTermination,
}

impl PingBehaviour {
    pub fn new(peer: Address, conversation_id: impl Into<String>, max_messages: u32, delay: Duration) -> Self {
        Self {
            peer,
            conversation_id: conversation_id.into(),
            max_messages,
            delay,
            count_sent: 0,
            history: Vec::new(),
            started_at: None,
            termination: AgentTermination::Interrupted,
        }
    }
}

#[async_trait]
impl Behaviour for PingBehaviour {
    fn kind(&self) -> BehaviourKind {
        BehaviourKind::Cyclic
    }

    async fn on_start(&mut self, ctx: &BehaviourContext) -> Result<()> {
        self.started_at = Some(Utc::now());
        info!(agent = %ctx.address(), peer = %self.peer, max = self.max_messages, "sender started");
        Ok(())
    }

    async fn run(&mut self, ctx: &BehaviourContext) -> Result<()> {
        if self.count_sent >= self.max_messages {
            info!(agent = %ctx.address(), sent = self.count_sent, "sender finished");
            ctx.stop_agent();
            return Ok(());
        }

        let body = format!("ping_{}", self.count_sent);
        let message = Message::new(ctx.address().clone(), self.peer.clone(), Performative::Inform)
            .with_conversation(self.conversation_id.as_str())
            .with_body(body.as_str());

        // stamped before delivery so it never sorts after its receipt
        let entry = HistoryEntry::sent(ctx.address(), &self.peer, body.as_str());
        ctx.send(message)?;
        self.history.push(entry);
        self.count_sent += 1;
        metrics::counter!(names::PINGS_SENT).increment(1);
        debug!(agent = %ctx.address(), "Ping sent #{}: {}", self.count_sent, body);

        ctx.sleep(self.delay).await;
        Ok(())
    }

    async fn on_end(&mut self, _ctx: &BehaviourContext) {
        if self.count_sent >= self.max_messages {
            self.termination = AgentTermination::Completed;
        }
    }
}

/// Responder role: answers every matching message until silence
pub struct PongBehaviour {
    receive_timeout: Duration,

    pub count_received: u32,
    pub history: Vec<HistoryEntry>,
    pub termination: AgentTermination,
}

impl PongBehaviour {
    pub fn new(receive_timeout: Duration) -> Self {
        Self {
            receive_timeout,
            count_received: 0,
            history: Vec::new(),
            termination: AgentTermination::Interrupted,
        }
    }

    /// Filter the responder listens with
    pub fn template(conversation_id: impl Into<String>) -> Template {
        Template::new()
            .performative(Performative::Inform)
            .conversation(conversation_id)
    }
}

#[async_trait]
impl Behaviour for PongBehaviour {
    fn kind(&self) -> BehaviourKind {
        BehaviourKind::Cyclic
    }

    async fn run(&mut self, ctx: &BehaviourContext) -> Result<()> {
        let Some(message) = ctx.receive(self.receive_timeout).await else {
            if ctx.is_alive() {
                info!(agent = %ctx.address(), received = self.count_received, "responder timed out, stopping");
                self.termination = AgentTermination::Silence;
                ctx.stop_agent();
            }
            return Ok(());
        };

        let reply = message
            .make_reply()
            .with_body(format!("pong_{}", self.count_received));
        ctx.send(reply)?;

        self.history.push(HistoryEntry::received(
            ctx.address(),
            &message.sender,
            message.body.as_str(),
        ));
        self.count_received += 1;
        metrics::counter!(names::PINGS_RECEIVED).increment(1);
        debug!(agent = %ctx.address(), "Pong sent #{} for {}", self.count_received, message.body);

        Ok(())
    }
}
