//! Shared types for the dispatcher: roles, priorities, queued items.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// One of the two remote agents a conversation alternates between.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    A,
    B,
}

impl Agent {
    /// The agent on the other side of the conversation.
    pub fn other(self) -> Agent {
        match self {
            Agent::A => Agent::B,
            Agent::B => Agent::A,
        }
    }

    /// Role under which this agent's replies are reported.
    pub fn role(self) -> Role {
        match self {
            Agent::A => Role::AgentA,
            Agent::B => Role::AgentB,
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Agent::A => write!(f, "agent-a"),
            Agent::B => write!(f, "agent-b"),
        }
    }
}

/// Message origin / participant role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    AgentA,
    AgentB,
    ExternalFeed,
}

impl Role {
    /// The agent behind this role, if any.
    pub fn agent(self) -> Option<Agent> {
        match self {
            Role::AgentA => Some(Agent::A),
            Role::AgentB => Some(Agent::B),
            Role::System | Role::ExternalFeed => None,
        }
    }

    /// Agent a prompt from this role is delivered to when no explicit target is given.
    ///
    /// Words from agent A are relayed to agent B; everything else goes to agent A.
    pub fn default_target(self) -> Agent {
        match self {
            Role::AgentA => Agent::B,
            Role::System | Role::AgentB | Role::ExternalFeed => Agent::A,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::AgentA => "agent_a",
            Role::AgentB => "agent_b",
            Role::ExternalFeed => "external_feed",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Dispatch priority. Higher variants are serviced first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// Highest level, used for retries.
    pub const MAX: Priority = Priority::Urgent;
}

/// How long a pushed reply is waited for, and what a timeout means.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    /// Best-effort status/telemetry prompt; a timeout resolves empty.
    Informational,
    /// A turn expected to produce a visible reply; a timeout is an error.
    Conversational,
}

/// Reply produced by a delivery strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub text: String,
    pub responder: Agent,
}

impl AgentReply {
    pub fn new(text: impl Into<String>, responder: Agent) -> Self {
        Self {
            text: text.into(),
            responder,
        }
    }

    pub fn responder_role(&self) -> Role {
        self.responder.role()
    }
}

/// Caller options for `Dispatcher::submit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Opt out of conversation chaining.
    #[serde(default)]
    pub skip_follow_up: bool,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl SubmitOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            skip_follow_up: false,
            priority: Some(priority),
        }
    }

    pub fn no_follow_up(mut self) -> Self {
        self.skip_follow_up = true;
        self
    }
}

/// Outcome delivered to the submitter.
pub type SubmitOutcome = Result<Option<AgentReply>>;

/// Single-assignment completion slot owned by a queued item.
///
/// Settling consumes the slot, so it can fire at most once. Follow-ups created by the
/// dispatcher itself carry a detached slot.
#[derive(Debug)]
pub struct Completion {
    tx: Option<oneshot::Sender<SubmitOutcome>>,
}

impl Completion {
    /// Create a slot and the receiver the caller awaits.
    pub fn channel() -> (Self, oneshot::Receiver<SubmitOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A slot nobody is waiting on.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn is_detached(&self) -> bool {
        self.tx.is_none()
    }

    pub fn resolve(self, reply: Option<AgentReply>) {
        self.settle(Ok(reply));
    }

    pub fn reject(self, error: Error) {
        self.settle(Err(error));
    }

    fn settle(mut self, outcome: SubmitOutcome) {
        if let Some(tx) = self.tx.take() {
            if tx.send(outcome).is_err() {
                tracing::debug!("Submitter dropped before completion");
            }
        }
    }
}

/// Unit of work in the dispatch queue.
#[derive(Debug)]
pub struct QueuedItem {
    /// Unique ID (ULID)
    pub id: String,

    /// Prompt text sent to the agent
    pub prompt: String,

    /// Originating role
    pub role: Role,

    /// Agent the prompt is delivered to, and whose reply is expected
    pub target: Agent,

    pub priority: Priority,

    /// Enqueue time (unix ms)
    pub enqueued_at: i64,

    pub conversation_id: Option<String>,

    pub retry_count: u32,

    pub skip_follow_up: bool,

    pub class: ResponseClass,

    pub completion: Completion,
}

impl QueuedItem {
    /// Create a new item addressed to the default target of `role`.
    pub fn new(prompt: impl Into<String>, role: Role, class: ResponseClass) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            prompt: prompt.into(),
            role,
            target: role.default_target(),
            priority: Priority::Normal,
            enqueued_at: now_millis(),
            conversation_id: None,
            retry_count: 0,
            skip_follow_up: false,
            class,
            completion: Completion::detached(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: Agent) -> Self {
        self.target = target;
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_skip_follow_up(mut self, skip: bool) -> Self {
        self.skip_follow_up = skip;
        self
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    pub fn is_informational(&self) -> bool {
        self.class == ResponseClass::Informational
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
