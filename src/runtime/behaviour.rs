// src/runtime/behaviour.rs
//! Behaviours: units of agent logic scheduled by the runtime
//!
//! A behaviour owns its own state. The runtime drives it according to its
//! [`BehaviourKind`]:
//! - **Cyclic**: `run` is re-invoked until the owning agent stops
//! - **OneShot**: `run` is invoked exactly once
//!
//! A behaviour suspends only through its [`BehaviourContext`] (`receive`,
//! `sleep`), and both return early when the agent is stopped.

use crate::runtime::agent_runtime::{AgentEntry, AgentRuntime};
use crate::runtime::message::{Address, Message, Template};
use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Scheduling variant of a behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviourKind {
    Cyclic,
    OneShot,
}

/// Agent logic driven by the runtime
#[async_trait]
pub trait Behaviour: Send + 'static {
    fn kind(&self) -> BehaviourKind;

    /// Called once before the first `run`
    async fn on_start(&mut self, _ctx: &BehaviourContext) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, ctx: &BehaviourContext) -> Result<()>;

    /// Called once after the last `run`, including after a failure
    async fn on_end(&mut self, _ctx: &BehaviourContext) {}
}

/// What a running behaviour can see and do
pub struct BehaviourContext {
    runtime: AgentRuntime,
    agent: Arc<AgentEntry>,
    template: Option<Template>,
}

impl BehaviourContext {
    pub(crate) fn new(runtime: AgentRuntime, agent: Arc<AgentEntry>, template: Option<Template>) -> Self {
        Self {
            runtime,
            agent,
            template,
        }
    }

    /// Address of the owning agent
    pub fn address(&self) -> &Address {
        self.agent.address()
    }

    /// Template this behaviour was registered with
    pub fn template(&self) -> Option<&Template> {
        self.template.as_ref()
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.runtime.send(message)
    }

    /// Next mailbox message matching this behaviour's template, or `None`
    /// after `timeout` or when the agent stops
    pub async fn receive(&self, timeout: Duration) -> Option<Message> {
        self.agent.receive(self.template.as_ref(), timeout).await
    }

    /// Like [`receive`](Self::receive) with an explicit template
    pub async fn receive_matching(&self, template: &Template, timeout: Duration) -> Option<Message> {
        self.agent.receive(Some(template), timeout).await
    }

    /// Sleep for `duration`; returns `false` if the agent stopped first
    pub async fn sleep(&self, duration: Duration) -> bool {
        self.agent.sleep(duration).await
    }

    pub fn stop_agent(&self) {
        self.runtime.stop_entry(&self.agent);
    }

    pub fn is_alive(&self) -> bool {
        self.agent.is_running()
    }
}
