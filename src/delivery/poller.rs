//! Session-polling delivery.
//!
//! One session per agent, opened lazily on first use and reused. A send posts the
//! prompt and then polls the session log until a new agent message shows up.

use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::strategy::{DeliveryStrategy, StrategyKind};
use crate::core::types::{Agent, AgentReply, QueuedItem};
use crate::error::{Error, Result};
use crate::transport::SessionTransport;

/// Polling cadence.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Upper bound of random extra delay added to each interval.
    pub jitter: Duration,
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            jitter: Duration::from_millis(500),
            max_attempts: 20,
        }
    }
}

pub struct Poller {
    transport: Arc<dyn SessionTransport>,
    agent_ids: HashMap<Agent, String>,
    config: PollerConfig,
    sessions: tokio::sync::Mutex<HashMap<Agent, String>>,
    /// Message ids already consumed, per session. Ids are only unique within a session.
    seen: Mutex<HashMap<String, HashSet<String>>>,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        agent_a_id: impl Into<String>,
        agent_b_id: impl Into<String>,
        config: PollerConfig,
    ) -> Self {
        let agent_ids = HashMap::from([(Agent::A, agent_a_id.into()), (Agent::B, agent_b_id.into())]);
        Self {
            transport,
            agent_ids,
            config,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Session for `agent`, created on first use.
    pub async fn session_for(&self, agent: Agent) -> Result<String> {
        let mut sessions = self.sessions.lock().await;
        if let Some(id) = sessions.get(&agent) {
            return Ok(id.clone());
        }

        let agent_id = self
            .agent_ids
            .get(&agent)
            .ok_or_else(|| Error::Initialization(format!("No agent id configured for {}", agent)))?;
        let caller_id = uuid::Uuid::new_v4().to_string();

        let session_id = self
            .transport
            .create_session(agent_id, &caller_id)
            .await
            .map_err(|e| match e {
                Error::Initialization(_) => e,
                other => Error::Initialization(format!("Session for {} failed: {}", agent, other)),
            })?;

        self.seed_seen(&session_id).await;
        tracing::info!(
            "Session initialized for {}: {}...",
            agent,
            session_id.chars().take(8).collect::<String>()
        );

        sessions.insert(agent, session_id.clone());
        Ok(session_id)
    }

    /// Mark existing history as seen so old agent messages are never taken as replies.
    async fn seed_seen(&self, session_id: &str) {
        match self.transport.fetch_messages(session_id).await {
            Ok(history) => {
                let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
                seen.entry(session_id.to_string())
                    .or_default()
                    .extend(history.into_iter().map(|m| m.id));
            }
            Err(e) => tracing::warn!("Failed to seed message history: {}", e),
        }
    }

    async fn poll_for_reply(&self, session_id: &str, agent: Agent) -> Result<Option<AgentReply>> {
        for attempt in 1..=self.config.max_attempts {
            match self.transport.fetch_messages(session_id).await {
                Ok(messages) => {
                    let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
                    let seen = seen.entry(session_id.to_string()).or_default();
                    for message in messages {
                        if message.content.is_empty() || !seen.insert(message.id.clone()) {
                            continue;
                        }
                        if message.is_from_agent {
                            return Ok(Some(AgentReply::new(message.content, agent)));
                        }
                    }
                }
                Err(e) => tracing::warn!("Poll error on attempt {}: {}", attempt, e),
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.next_delay()).await;
            }
        }

        tracing::warn!("Response timeout for {}", agent);
        Err(Error::ResponseTimeout {
            responder: agent,
            waited: self.config.interval * self.config.max_attempts,
        })
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.config.interval + Duration::from_millis(extra)
    }
}

#[async_trait]
impl DeliveryStrategy for Poller {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Poller
    }

    async fn send(&self, item: &QueuedItem) -> Result<Option<AgentReply>> {
        let session_id = self.session_for(item.target).await?;
        self.transport.post_message(&session_id, &item.prompt).await?;
        tracing::info!("Message {} posted to {}", item.id, item.target);
        self.poll_for_reply(&session_id, item.target).await
    }
}
