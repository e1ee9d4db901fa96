//! Agent transports: session-style (request + poll) and push-style channels.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::types::Agent;
use crate::error::Result;

pub use http::{HttpPushChannel, HttpSessionTransport};

/// A message in an agent session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMessage {
    pub id: String,
    #[serde(rename = "isAgent", default)]
    pub is_from_agent: bool,
    #[serde(default)]
    pub content: String,
}

/// Session endpoint of the agent server, used by the poller.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open a session between `agent_id` and a caller; returns the session id.
    async fn create_session(&self, agent_id: &str, caller_id: &str) -> Result<String>;

    /// Post a prompt into a session.
    async fn post_message(&self, session_id: &str, text: &str) -> Result<()>;

    /// Full message log of a session.
    async fn fetch_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>>;
}

/// Outbound half of a push connection to one agent.
///
/// Replies arrive separately through `Dispatcher::on_agent_response`.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Push channels for both agents, registered together.
#[derive(Clone)]
pub struct Channels {
    pub a: std::sync::Arc<dyn PushChannel>,
    pub b: std::sync::Arc<dyn PushChannel>,
}

impl Channels {
    pub fn for_agent(&self, agent: Agent) -> &std::sync::Arc<dyn PushChannel> {
        match agent {
            Agent::A => &self.a,
            Agent::B => &self.b,
        }
    }
}
