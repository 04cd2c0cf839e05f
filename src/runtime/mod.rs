// src/runtime/mod.rs
//! Execution runtime
//!
//! Two halves that never touch each other directly:
//!
//! - **Agent runtime**: named agents with FIFO mailboxes and cooperative
//!   behaviours, all scheduled on the caller's tokio runtime
//! - **Process supervisor**: external child processes, tracked in a single
//!   registry and torn down with SIGTERM then SIGKILL
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 AgentRuntime                 │
//! │  ┌──────────────┐        ┌──────────────┐    │
//! │  │ ping@local   │ ─────▶ │ pong@local   │    │
//! │  │  mailbox     │ ◀───── │  mailbox     │    │
//! │  │  behaviours  │        │  behaviours  │    │
//! │  └──────────────┘        └──────────────┘    │
//! └──────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────┐
//! │              ProcessSupervisor               │
//! │   registry: [ pid, child, output tail ]      │
//! └──────────────────────────────────────────────┘
//! ```

pub mod agent_runtime;
pub mod behaviour;
pub mod mailbox;
pub mod message;
pub mod process_supervisor;

// Re-export commonly used types
pub use agent_runtime::{AgentRuntime, AgentState, BehaviourHandle};
pub use behaviour::{Behaviour, BehaviourContext, BehaviourKind};
pub use mailbox::{Mailbox, MailboxStats};
pub use message::{Address, Message, Performative, Template};
pub use process_supervisor::{LaunchCommand, ProcessInfo, ProcessSupervisor, Termination, TerminationSummary};
