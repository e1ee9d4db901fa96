//! Broadcast relay for operator messages.
//!
//! Messages published here fan out to every live subscriber (the SSE stream, and
//! optionally the dispatcher as external-feed prompts).

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::core::dispatcher::Dispatcher;
use crate::core::types::{now_millis, Priority, Role, SubmitOptions};
use crate::error::{Error, Result};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub message: String,
    /// Unix ms
    pub time: i64,
}

pub struct Relay {
    sender: RwLock<Option<broadcast::Sender<RelayMessage>>>,
}

impl Relay {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    fn sender(&self) -> Result<broadcast::Sender<RelayMessage>> {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::Closed)
    }

    /// Broadcast a message; returns how many subscribers received it.
    pub fn publish(&self, message: impl Into<String>) -> Result<usize> {
        let message = RelayMessage {
            message: message.into(),
            time: now_millis(),
        };
        // No subscribers is not an error, the message is simply dropped.
        Ok(self.sender()?.send(message).unwrap_or(0))
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<RelayMessage>> {
        Ok(self.sender()?.subscribe())
    }

    pub fn receiver_count(&self) -> usize {
        self.sender()
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Close the relay. Subscribers see the stream end.
    pub fn shutdown(&self) {
        if self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            tracing::info!(kind = "system", "Relay shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Submit every relayed message to `dispatcher` as an external-feed prompt.
    pub fn forward_to(&self, dispatcher: Dispatcher) -> Result<JoinHandle<()>> {
        let mut receiver = self.subscribe()?;

        Ok(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(relayed) => {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(e) = dispatcher
                                .submit(
                                    relayed.message,
                                    Role::ExternalFeed,
                                    SubmitOptions::with_priority(Priority::High).no_follow_up(),
                                )
                                .await
                            {
                                tracing::warn!("Relayed message failed: {}", e);
                            }
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Relay forwarder lagged, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Relay forwarder stopped");
        }))
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
