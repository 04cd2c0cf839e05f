// src/runtime/agent_runtime.rs
//! Agent runtime: registry, lifecycle and message routing
//!
//! Manages agents addressed by name:
//! - Registration and behaviour scheduling
//! - Start/stop lifecycle (`Created → Running → Stopped`)
//! - Mailbox delivery and bounded-timeout receive
//!
//! Each behaviour runs as its own tokio task. On a current-thread runtime
//! this gives a single cooperative scheduler: a behaviour only yields at a
//! `receive`, a `sleep`, or between two invocations of a cyclic behaviour.

use crate::observability::names;
use crate::runtime::behaviour::{Behaviour, BehaviourContext, BehaviourKind};
use crate::runtime::mailbox::{Mailbox, MailboxStats};
use crate::runtime::message::{Address, Message, Template};
use crate::utils::errors::{EngineError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Agent lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Created,
    Running,
    Stopped,
}

/// Deferred spawn of a behaviour, run when its agent starts
type Starter = Box<dyn FnOnce(AgentRuntime, Arc<AgentEntry>) + Send>;

/// Runtime-side record of one agent
pub(crate) struct AgentEntry {
    address: Address,
    mailbox: Mailbox,
    state: Mutex<AgentState>,
    stop: CancellationToken,
    pending: Mutex<Vec<Starter>>,
}

impl AgentEntry {
    fn new(address: Address) -> Self {
        Self {
            address,
            mailbox: Mailbox::new(),
            state: Mutex::new(AgentState::Created),
            stop: CancellationToken::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn address(&self) -> &Address {
        &self.address
    }

    pub(crate) fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == AgentState::Running
    }

    /// Transition to `Stopped`; returns `false` if already stopped
    fn stop(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == AgentState::Stopped {
                return false;
            }
            *state = AgentState::Stopped;
        }

        self.stop.cancel();
        self.mailbox.wake_all();
        self.pending.lock().clear();
        true
    }

    pub(crate) async fn receive(&self, template: Option<&Template>, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.state() == AgentState::Stopped {
                return None;
            }

            let notified = self.mailbox.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.mailbox.take_matching(template) {
                return Some(message);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.stop.cancelled() => return None,
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    pub(crate) async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stop.cancelled() => false,
        }
    }
}

/// Handle to a scheduled behaviour
pub struct BehaviourHandle<B> {
    address: Address,
    result: oneshot::Receiver<Result<B>>,
}

impl<B> BehaviourHandle<B> {
    /// Wait for the behaviour to finish and take back its final state
    pub async fn join(self) -> Result<B> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::BehaviourFailed(format!(
                "behaviour on {} ended without reporting (panicked or never started)",
                self.address
            ))),
        }
    }
}

/// Agent runtime shared by every behaviour of a run
#[derive(Clone, Default)]
pub struct AgentRuntime {
    agents: Arc<DashMap<Address, Arc<AgentEntry>>>,
}

impl AgentRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent in the `Created` state
    pub fn register(&self, address: impl Into<Address>) -> Result<Address> {
        let address = address.into();

        match self.agents.entry(address.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateAgent(address.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(AgentEntry::new(address.clone())));
                debug!(agent = %address, "agent registered");
                Ok(address)
            }
        }
    }

    fn entry(&self, address: &Address) -> Result<Arc<AgentEntry>> {
        self.agents
            .get(address)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownAgent(address.to_string()))
    }

    /// Schedule a behaviour on an agent.
    ///
    /// Runs once the agent starts, or immediately if it is already running.
    pub fn add_behaviour<B: Behaviour>(
        &self,
        address: &Address,
        behaviour: B,
        template: Option<Template>,
    ) -> Result<BehaviourHandle<B>> {
        let entry = self.entry(address)?;
        let (tx, rx) = oneshot::channel();

        let starter: Starter = Box::new(move |runtime, agent| {
            let ctx = BehaviourContext::new(runtime, agent, template);
            tokio::spawn(async move {
                let _ = tx.send(drive(behaviour, ctx).await);
            });
        });

        let run_now = {
            let state = entry.state.lock();
            match *state {
                AgentState::Created => {
                    entry.pending.lock().push(starter);
                    None
                }
                AgentState::Running => Some(starter),
                AgentState::Stopped => {
                    return Err(EngineError::InvalidState(format!(
                        "cannot add behaviour to stopped agent {}",
                        address
                    )))
                }
            }
        };

        if let Some(starter) = run_now {
            starter(self.clone(), Arc::clone(&entry));
        }

        Ok(BehaviourHandle {
            address: address.clone(),
            result: rx,
        })
    }

    /// Move an agent from `Created` to `Running` and spawn its behaviours
    pub fn start(&self, address: &Address) -> Result<()> {
        let entry = self.entry(address)?;

        let starters = {
            let mut state = entry.state.lock();
            if *state != AgentState::Created {
                return Err(EngineError::InvalidState(format!(
                    "cannot start {} in state {:?}",
                    address, *state
                )));
            }
            *state = AgentState::Running;
            std::mem::take(&mut *entry.pending.lock())
        };

        info!(agent = %address, behaviours = starters.len(), "agent started");

        for starter in starters {
            starter(self.clone(), Arc::clone(&entry));
        }

        Ok(())
    }

    /// Stop an agent, releasing any pending receive or sleep. Idempotent.
    pub fn stop(&self, address: &Address) -> Result<()> {
        let entry = self.entry(address)?;
        self.stop_entry(&entry);
        Ok(())
    }

    pub(crate) fn stop_entry(&self, entry: &AgentEntry) {
        if entry.stop() {
            info!(agent = %entry.address, "agent stopped");
        }
    }

    /// Stop every registered agent
    pub fn stop_all(&self) {
        let entries: Vec<Arc<AgentEntry>> = self
            .agents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for entry in entries {
            self.stop_entry(&entry);
        }
    }

    /// Deliver a message to its recipient's mailbox.
    ///
    /// Messages to a stopped agent are dropped and counted, not an error.
    pub fn send(&self, message: Message) -> Result<()> {
        let entry = self.entry(&message.to)?;

        if entry.state() == AgentState::Stopped {
            debug!(from = %message.sender, to = %message.to, body = %message.body, "recipient stopped, message dropped");
            entry.mailbox.record_drop();
            metrics::counter!(names::MESSAGES_DROPPED).increment(1);
            return Ok(());
        }

        debug!(
            from = %message.sender,
            to = %message.to,
            performative = message.performative.as_str(),
            body = %message.body,
            "message delivered"
        );
        entry.mailbox.push(message);
        metrics::counter!(names::MESSAGES_DELIVERED).increment(1);

        Ok(())
    }

    /// Wait up to `timeout` for a message matching `template` on an agent's mailbox
    pub async fn receive(
        &self,
        address: &Address,
        template: Option<&Template>,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        let entry = self.entry(address)?;
        Ok(entry.receive(template, timeout).await)
    }

    /// Whether the agent is `Running` (unknown agents are not)
    pub fn is_alive(&self, address: &Address) -> bool {
        self.entry(address).map(|e| e.is_running()).unwrap_or(false)
    }

    pub fn state(&self, address: &Address) -> Option<AgentState> {
        self.entry(address).ok().map(|e| e.state())
    }

    pub fn mailbox_stats(&self, address: &Address) -> Option<MailboxStats> {
        self.entry(address).ok().map(|e| e.mailbox.stats())
    }

    /// Resolves once the agent has stopped
    pub async fn wait_stopped(&self, address: &Address) -> Result<()> {
        let token = self.entry(address)?.stop.clone();
        token.cancelled().await;
        Ok(())
    }

    pub fn agents(&self) -> Vec<Address> {
        self.agents.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Drive one behaviour until it finishes or its agent stops
async fn drive<B: Behaviour>(mut behaviour: B, ctx: BehaviourContext) -> Result<B> {
    let kind = behaviour.kind();
    debug!(agent = %ctx.address(), ?kind, "behaviour started");

    let outcome: Result<()> = async {
        behaviour.on_start(&ctx).await?;
        while ctx.is_alive() {
            behaviour.run(&ctx).await?;
            if kind == BehaviourKind::OneShot {
                break;
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }
    .await;

    if let Err(e) = outcome {
        warn!(agent = %ctx.address(), error = %e, "behaviour failed, stopping agent");
        ctx.stop_agent();
        behaviour.on_end(&ctx).await;
        return Err(EngineError::BehaviourFailed(format!("{}: {}", ctx.address(), e)));
    }

    behaviour.on_end(&ctx).await;
    debug!(agent = %ctx.address(), ?kind, "behaviour finished");
    Ok(behaviour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::message::Performative;
    use async_trait::async_trait;

    struct Counter {
        kind: BehaviourKind,
        runs: u32,
        stop_after: u32,
    }

    #[async_trait]
    impl Behaviour for Counter {
        fn kind(&self) -> BehaviourKind {
            self.kind
        }

        async fn run(&mut self, ctx: &BehaviourContext) -> Result<()> {
            self.runs += 1;
            if self.runs >= self.stop_after {
                ctx.stop_agent();
            }
            Ok(())
        }
    }

    struct Collector {
        received: Vec<String>,
        timeout: Duration,
    }

    #[async_trait]
    impl Behaviour for Collector {
        fn kind(&self) -> BehaviourKind {
            BehaviourKind::Cyclic
        }

        async fn run(&mut self, ctx: &BehaviourContext) -> Result<()> {
            match ctx.receive(self.timeout).await {
                Some(msg) => self.received.push(msg.body),
                None => ctx.stop_agent(),
            }
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Behaviour for Failing {
        fn kind(&self) -> BehaviourKind {
            BehaviourKind::Cyclic
        }

        async fn run(&mut self, _ctx: &BehaviourContext) -> Result<()> {
            Err(EngineError::Fatal("boom".into()))
        }
    }

    fn msg(from: &str, to: &str, body: &str) -> Message {
        Message::new(from.into(), to.into(), Performative::Inform).with_body(body)
    }

    #[test]
    fn test_register_duplicate() {
        let runtime = AgentRuntime::new();
        runtime.register("a@localhost").unwrap();
        assert!(matches!(
            runtime.register("a@localhost"),
            Err(EngineError::DuplicateAgent(_))
        ));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();
        assert_eq!(runtime.state(&addr), Some(AgentState::Created));
        assert!(!runtime.is_alive(&addr));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();

        runtime.start(&addr).unwrap();
        assert!(runtime.is_alive(&addr));
        assert!(runtime.start(&addr).is_err());

        runtime.stop(&addr).unwrap();
        runtime.stop(&addr).unwrap();
        assert_eq!(runtime.state(&addr), Some(AgentState::Stopped));
        assert!(!runtime.is_alive(&addr));
    }

    #[tokio::test]
    async fn test_one_shot_runs_once() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();
        let handle = runtime
            .add_behaviour(
                &addr,
                Counter { kind: BehaviourKind::OneShot, runs: 0, stop_after: 100 },
                None,
            )
            .unwrap();

        runtime.start(&addr).unwrap();
        let counter = handle.join().await.unwrap();
        assert_eq!(counter.runs, 1);
        assert!(runtime.is_alive(&addr));
    }

    #[tokio::test]
    async fn test_cyclic_runs_until_stopped() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();
        let handle = runtime
            .add_behaviour(
                &addr,
                Counter { kind: BehaviourKind::Cyclic, runs: 0, stop_after: 4 },
                None,
            )
            .unwrap();

        runtime.start(&addr).unwrap();
        assert_eq!(handle.join().await.unwrap().runs, 4);
        assert!(!runtime.is_alive(&addr));
    }

    #[tokio::test]
    async fn test_send_unknown_recipient() {
        let runtime = AgentRuntime::new();
        assert!(matches!(
            runtime.send(msg("a", "ghost@localhost", "x")),
            Err(EngineError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_send_to_stopped_agent_is_dropped() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("b@localhost").unwrap();
        runtime.start(&addr).unwrap();
        runtime.stop(&addr).unwrap();

        runtime.send(msg("a", "b@localhost", "late")).unwrap();
        let stats = runtime.mailbox_stats(&addr).unwrap();
        assert_eq!(stats.drop_count, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_receive_times_out_within_bounds() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();
        runtime.start(&addr).unwrap();

        let timeout = Duration::from_millis(150);
        let started = std::time::Instant::now();
        let received = runtime.receive(&addr, None, timeout).await.unwrap();
        let elapsed = started.elapsed();

        assert!(received.is_none());
        assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
        assert!(elapsed < timeout + Duration::from_millis(250), "returned late after {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_stop_releases_pending_receive() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();
        runtime.start(&addr).unwrap();

        let waiter = {
            let runtime = runtime.clone();
            let addr = addr.clone();
            tokio::spawn(async move { runtime.receive(&addr, None, Duration::from_secs(30)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        runtime.stop(&addr).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receive was not released")
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_delivery() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("b@localhost").unwrap();
        runtime.start(&addr).unwrap();

        let sender = {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                runtime.send(msg("a@localhost", "b@localhost", "hello")).unwrap();
            })
        };

        let received = runtime.receive(&addr, None, Duration::from_secs(5)).await.unwrap();
        assert_eq!(received.map(|m| m.body).as_deref(), Some("hello"));
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_queued_before_start_are_delivered_in_order() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("b@localhost").unwrap();
        for i in 0..5 {
            runtime.send(msg("a@localhost", "b@localhost", &format!("m{}", i))).unwrap();
        }
        // interleaved traffic from another sender
        runtime.send(msg("c@localhost", "b@localhost", "other")).unwrap();

        let handle = runtime
            .add_behaviour(
                &addr,
                Collector { received: Vec::new(), timeout: Duration::from_millis(50) },
                Some(Template::new().sender("a@localhost".into())),
            )
            .unwrap();
        runtime.start(&addr).unwrap();

        let collector = handle.join().await.unwrap();
        assert_eq!(collector.received, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_failing_behaviour_stops_agent() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();
        let handle = runtime.add_behaviour(&addr, Failing, None).unwrap();
        runtime.start(&addr).unwrap();

        assert!(matches!(handle.join().await, Err(EngineError::BehaviourFailed(_))));
        assert_eq!(runtime.state(&addr), Some(AgentState::Stopped));
    }

    #[tokio::test]
    async fn test_behaviour_dropped_when_stopped_before_start() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();
        let handle = runtime
            .add_behaviour(
                &addr,
                Counter { kind: BehaviourKind::OneShot, runs: 0, stop_after: 1 },
                None,
            )
            .unwrap();
        runtime.stop(&addr).unwrap();

        assert!(handle.join().await.is_err());
        assert!(runtime
            .add_behaviour(&addr, Counter { kind: BehaviourKind::OneShot, runs: 0, stop_after: 1 }, None)
            .is_err());
    }

    #[tokio::test]
    async fn test_wait_stopped() {
        let runtime = AgentRuntime::new();
        let addr = runtime.register("a@localhost").unwrap();
        runtime.start(&addr).unwrap();

        let stopper = {
            let runtime = runtime.clone();
            let addr = addr.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                runtime.stop(&addr).unwrap();
            })
        };

        tokio::time::timeout(Duration::from_secs(1), runtime.wait_stopped(&addr))
            .await
            .unwrap()
            .unwrap();
        stopper.await.unwrap();
    }
}
