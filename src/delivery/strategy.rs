//! Delivery strategy trait for Duologue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::types::{Agent, AgentReply, QueuedItem};
use crate::error::{Error, Result};
use crate::transport::Channels;

/// Which delivery strategy a dispatcher runs with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Post to a session and poll its log.
    Poller,
    /// Push over a channel and wait for the reply callback.
    Correlator,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::Correlator
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poller" | "session" => Ok(StrategyKind::Poller),
            "correlator" | "websocket" | "push" => Ok(StrategyKind::Correlator),
            _ => Err(format!("Unknown delivery strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Poller => write!(f, "poller"),
            StrategyKind::Correlator => write!(f, "correlator"),
        }
    }
}

/// Sends one queued item to its target agent and waits for the reply.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Deliver `item` and wait for the target agent's reply.
    ///
    /// `Ok(None)` means the wait ended without a reply and the item's class tolerates
    /// that.
    async fn send(&self, item: &QueuedItem) -> Result<Option<AgentReply>>;

    /// Install push channels. Only meaningful for push-based strategies.
    fn register_channels(&self, channels: Channels) -> Result<()> {
        let _ = channels;
        Err(Error::Config(format!(
            "{} strategy does not use push channels",
            self.kind()
        )))
    }

    /// Inbound reply from `responder`. Returns whether it matched an outstanding send.
    fn on_agent_response(&self, responder: Agent, text: &str) -> bool {
        tracing::debug!(
            "Ignoring pushed reply from {} ({} chars) under {} strategy",
            responder,
            text.len(),
            self.kind()
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("poller".parse::<StrategyKind>().unwrap(), StrategyKind::Poller);
        assert_eq!("SESSION".parse::<StrategyKind>().unwrap(), StrategyKind::Poller);
        assert_eq!(
            "websocket".parse::<StrategyKind>().unwrap(),
            StrategyKind::Correlator
        );
        assert!("carrier-pigeon".parse::<StrategyKind>().is_err());
    }
}
