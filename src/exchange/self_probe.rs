// src/exchange/self_probe.rs
//! Single-agent loopback check
//!
//! One agent sends `test_message_<i>` to its own address from a one-shot
//! behaviour while a cyclic behaviour on the same agent collects them.

use crate::exchange::result::{AgentTermination, HistoryEntry};
use crate::observability::names;
use crate::runtime::behaviour::{Behaviour, BehaviourContext, BehaviourKind};
use crate::runtime::message::{Message, Performative, Template};
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Sends the whole probe batch to its own agent, then ends
pub struct ProbeSender {
    conversation_id: String,
    max_messages: u32,
    delay: Duration,
    sent: Arc<AtomicU32>,

    pub history: Vec<HistoryEntry>,
}

impl ProbeSender {
    pub fn new(conversation_id: impl Into<String>, max_messages: u32, delay: Duration, sent: Arc<AtomicU32>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            max_messages,
            delay,
            sent,
            history: Vec::new(),
        }
    }

    pub fn count_sent(&self) -> u32 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Behaviour for ProbeSender {
    fn kind(&self) -> BehaviourKind {
        BehaviourKind::OneShot
    }

    async fn run(&mut self, ctx: &BehaviourContext) -> Result<()> {
        let me = ctx.address().clone();

        for i in 0..self.max_messages {
            let body = format!("test_message_{}", i);
            // stamped before delivery so it never sorts after its receipt
            let entry = HistoryEntry::sent(&me, &me, body.as_str());
            ctx.send(
                Message::new(me.clone(), me.clone(), Performative::Inform)
                    .with_conversation(self.conversation_id.as_str())
                    .with_body(body.as_str()),
            )?;
            self.history.push(entry);
            self.sent.fetch_add(1, Ordering::SeqCst);
            metrics::counter!(names::PINGS_SENT).increment(1);
            debug!(agent = %me, "probe message {} sent", body);

            if !ctx.sleep(self.delay).await {
                break;
            }
        }

        info!(agent = %me, sent = self.count_sent(), "probe batch sent");
        Ok(())
    }
}

/// Collects probe messages until the batch is complete or the line goes quiet
pub struct ProbeReceiver {
    max_messages: u32,
    receive_timeout: Duration,
    sent: Arc<AtomicU32>,

    pub count_received: u32,
    pub history: Vec<HistoryEntry>,
    pub termination: AgentTermination,
}

impl ProbeReceiver {
    pub fn new(max_messages: u32, receive_timeout: Duration, sent: Arc<AtomicU32>) -> Self {
        Self {
            max_messages,
            receive_timeout,
            sent,
            count_received: 0,
            history: Vec::new(),
            termination: AgentTermination::Interrupted,
        }
    }

    pub fn template(conversation_id: impl Into<String>) -> Template {
        Template::new()
            .performative(Performative::Inform)
            .conversation(conversation_id)
    }
}

#[async_trait]
impl Behaviour for ProbeReceiver {
    fn kind(&self) -> BehaviourKind {
        BehaviourKind::Cyclic
    }

    async fn run(&mut self, ctx: &BehaviourContext) -> Result<()> {
        match ctx.receive(self.receive_timeout).await {
            Some(message) => {
                self.history.push(HistoryEntry::received(
                    ctx.address(),
                    &message.sender,
                    message.body.as_str(),
                ));
                self.count_received += 1;
                metrics::counter!(names::PINGS_RECEIVED).increment(1);

                if self.count_received >= self.max_messages {
                    info!(agent = %ctx.address(), received = self.count_received, "probe complete");
                    self.termination = AgentTermination::Completed;
                    ctx.stop_agent();
                }
            }
            // sender still mid-batch
            None if ctx.is_alive() && self.sent.load(Ordering::SeqCst) < self.max_messages => {
                debug!(agent = %ctx.address(), "probe receive timed out, sender still running");
            }
            None if ctx.is_alive() => {
                info!(
                    agent = %ctx.address(),
                    sent = self.sent.load(Ordering::SeqCst),
                    received = self.count_received,
                    "probe timed out, stopping"
                );
                self.termination = AgentTermination::Silence;
                ctx.stop_agent();
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::agent_runtime::AgentRuntime;

    #[tokio::test]
    async fn test_self_probe_round_trip() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("probe@localhost").unwrap();
        let sent = Arc::new(AtomicU32::new(0));

        let receiver = runtime
            .add_behaviour(
                &addr,
                ProbeReceiver::new(4, Duration::from_millis(500), Arc::clone(&sent)),
                Some(ProbeReceiver::template("probe")),
            )
            .unwrap();
        let sender = runtime
            .add_behaviour(
                &addr,
                ProbeSender::new("probe", 4, Duration::from_millis(5), Arc::clone(&sent)),
                None,
            )
            .unwrap();
        runtime.start(&addr).unwrap();

        let receiver = receiver.join().await.unwrap();
        let sender = sender.join().await.unwrap();

        assert_eq!(sender.count_sent(), 4);
        assert_eq!(receiver.count_received, 4);
        assert_eq!(receiver.termination, AgentTermination::Completed);
        assert_eq!(receiver.history[3].payload, "test_message_3");
        assert_eq!(receiver.history[0].peer, addr);

        for (sent, received) in sender.history.iter().zip(&receiver.history) {
            assert_eq!(sent.payload, received.payload);
            assert!(sent.timestamp <= received.timestamp);
        }
    }
}
