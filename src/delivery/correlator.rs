//! Push-channel delivery with reply correlation.
//!
//! A send registers a pending correlation, pushes the prompt over the target agent's
//! channel and waits for `on_agent_response` to report a reply from that agent.

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

use super::pending::{PendingResponseRegistry, TimeoutPolicy};
use super::strategy::{DeliveryStrategy, StrategyKind};
use crate::core::types::{Agent, AgentReply, QueuedItem, ResponseClass};
use crate::error::{Error, Result};
use crate::transport::Channels;

pub struct Correlator {
    channels: RwLock<Option<Channels>>,
    registry: Arc<PendingResponseRegistry>,
    timeouts: TimeoutPolicy,
}

impl Correlator {
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        Self {
            channels: RwLock::new(None),
            registry: Arc::new(PendingResponseRegistry::new()),
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<PendingResponseRegistry> {
        &self.registry
    }

    pub fn has_channels(&self) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn channels(&self) -> Option<Channels> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeliveryStrategy for Correlator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Correlator
    }

    async fn send(&self, item: &QueuedItem) -> Result<Option<AgentReply>> {
        let target = item.target;
        let channel = self
            .channels()
            .map(|channels| channels.for_agent(target).clone())
            .ok_or(Error::TransportNotReady(target))?;

        let mut reply = self.registry.register(&item.id, target, item.class);

        if let Err(e) = channel.send(&item.prompt).await {
            self.registry.remove(&item.id);
            tracing::error!("{} channel send error: {}", target, e);
            return Err(match e {
                Error::SendFailure(_) => e,
                other => Error::SendFailure(other.to_string()),
            });
        }
        tracing::info!("Message {} sent to {}", item.id, target);

        let wait = self.timeouts.timeout_for(item.class);
        match tokio::time::timeout(wait, &mut reply).await {
            Ok(Ok(text)) => Ok(Some(AgentReply::new(text, target))),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                if !self.registry.remove(&item.id) {
                    // Resolved in the same instant the timer fired.
                    if let Ok(text) = reply.try_recv() {
                        return Ok(Some(AgentReply::new(text, target)));
                    }
                }
                tracing::warn!("{} response timeout ({}s)", target, wait.as_secs());
                match item.class {
                    ResponseClass::Informational => {
                        tracing::info!("Informational item {} timed out, continuing", item.id);
                        Ok(None)
                    }
                    ResponseClass::Conversational => Err(Error::ResponseTimeout {
                        responder: target,
                        waited: wait,
                    }),
                }
            }
        }
    }

    fn register_channels(&self, channels: Channels) -> Result<()> {
        *self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(channels);
        tracing::info!(kind = "system", "Agent push channels registered");
        Ok(())
    }

    fn on_agent_response(&self, responder: Agent, text: &str) -> bool {
        match self.registry.resolve(responder, text) {
            Some(_) => true,
            None => {
                tracing::debug!("Discarding unmatched reply from {}", responder);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::transport::PushChannel;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl PushChannel for RecordingChannel {
        async fn send(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(Error::Other("socket closed".into()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn correlator_with(a: Arc<RecordingChannel>, b: Arc<RecordingChannel>) -> Arc<Correlator> {
        let correlator = Arc::new(Correlator::new(TimeoutPolicy::default()));
        correlator.register_channels(Channels { a, b }).unwrap();
        correlator
    }

    fn item(prompt: &str, role: Role, class: ResponseClass) -> QueuedItem {
        QueuedItem::new(prompt, role, class)
    }

    #[tokio::test]
    async fn test_send_before_registration() {
        let correlator = Correlator::new(TimeoutPolicy::default());
        let result = correlator
            .send(&item("hi", Role::System, ResponseClass::Conversational))
            .await;
        assert!(matches!(result, Err(Error::TransportNotReady(Agent::A))));
        assert!(correlator.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_resolves_send() {
        let a = Arc::new(RecordingChannel::default());
        let b = Arc::new(RecordingChannel::default());
        let correlator = correlator_with(a.clone(), b.clone());

        let sending = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .send(&item("relay this", Role::AgentA, ResponseClass::Conversational))
                    .await
            })
        };

        while correlator.registry().is_empty() {
            tokio::task::yield_now().await;
        }
        // Agent A is not the expected responder for a prompt relayed to B.
        assert!(!correlator.on_agent_response(Agent::A, "wrong"));
        assert!(correlator.on_agent_response(Agent::B, "right"));

        let reply = sending.await.unwrap().unwrap().unwrap();
        assert_eq!(reply, AgentReply::new("right", Agent::B));
        assert_eq!(b.sent.lock().unwrap().as_slice(), ["relay this"]);
        assert!(a.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversational_timeout_rejects() {
        let correlator = correlator_with(Arc::default(), Arc::default());
        let started = tokio::time::Instant::now();

        let result = correlator
            .send(&item("hello?", Role::System, ResponseClass::Conversational))
            .await;

        assert!(matches!(
            result,
            Err(Error::ResponseTimeout {
                responder: Agent::A,
                ..
            })
        ));
        assert!(started.elapsed() >= Duration::from_secs(180));
        assert!(correlator.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_informational_timeout_resolves_empty() {
        let correlator = correlator_with(Arc::default(), Arc::default());
        let started = tokio::time::Instant::now();

        let result = correlator
            .send(&item("📊 Wallet Update", Role::System, ResponseClass::Informational))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(correlator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_channel_error_is_send_failure() {
        let failing = Arc::new(RecordingChannel {
            fail: true,
            ..Default::default()
        });
        let correlator = correlator_with(failing, Arc::default());

        let result = correlator
            .send(&item("hi", Role::System, ResponseClass::Conversational))
            .await;
        assert!(matches!(result, Err(Error::SendFailure(_))));
        assert!(correlator.registry().is_empty());
    }
}
