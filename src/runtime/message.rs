// src/runtime/message.rs
//! Messages exchanged between agents and the templates that filter them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Agent address, e.g. `ping@localhost`
///
/// Agents only ever hold each other's address, never a handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Communicative act of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Performative {
    Inform,
    Request,
    Agree,
    Refuse,
    Failure,
}

impl Performative {
    pub fn as_str(&self) -> &str {
        match self {
            Performative::Inform => "inform",
            Performative::Request => "request",
            Performative::Agree => "agree",
            Performative::Refuse => "refuse",
            Performative::Failure => "failure",
        }
    }
}

/// Immutable message value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Ulid,
    pub sender: Address,
    pub to: Address,
    pub performative: Performative,
    pub conversation_id: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Address, to: Address, performative: Performative) -> Self {
        Self {
            id: Ulid::new(),
            sender,
            to,
            performative,
            conversation_id: None,
            body: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Reply addressed back to the sender, same performative and conversation
    pub fn make_reply(&self) -> Self {
        Self {
            id: Ulid::new(),
            sender: self.to.clone(),
            to: self.sender.clone(),
            performative: self.performative,
            conversation_id: self.conversation_id.clone(),
            body: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Message filter. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub performative: Option<Performative>,
    pub conversation_id: Option<String>,
    pub sender: Option<Address>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn performative(mut self, performative: Performative) -> Self {
        self.performative = Some(performative);
        self
    }

    pub fn conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        if let Some(performative) = self.performative {
            if message.performative != performative {
                return false;
            }
        }

        if let Some(conversation_id) = &self.conversation_id {
            if message.conversation_id.as_deref() != Some(conversation_id.as_str()) {
                return false;
            }
        }

        if let Some(sender) = &self.sender {
            if &message.sender != sender {
                return false;
            }
        }

        true
    }
}
