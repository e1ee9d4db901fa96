//! Registry of outbound prompts awaiting a pushed reply, and timeout classification.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::core::types::{Agent, ResponseClass};

/// Wait budget for best-effort status prompts.
pub const INFORMATIONAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait budget for conversational turns.
pub const CONVERSATIONAL_TIMEOUT: Duration = Duration::from_secs(180);

/// Substrings that mark a prompt as an informational status report.
pub const DEFAULT_INFORMATIONAL_MARKERS: &[&str] = &["Wallet Update", "📊"];

/// Per-class timeouts plus the heuristic that picks the class.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    pub informational: Duration,
    pub conversational: Duration,
    markers: Vec<String>,
}

impl TimeoutPolicy {
    pub fn new(informational: Duration, conversational: Duration, markers: Vec<String>) -> Self {
        Self {
            informational,
            conversational,
            markers,
        }
    }

    pub fn classify(&self, prompt: &str) -> ResponseClass {
        if self.markers.iter().any(|marker| prompt.contains(marker.as_str())) {
            ResponseClass::Informational
        } else {
            ResponseClass::Conversational
        }
    }

    pub fn timeout_for(&self, class: ResponseClass) -> Duration {
        match class {
            ResponseClass::Informational => self.informational,
            ResponseClass::Conversational => self.conversational,
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(
            INFORMATIONAL_TIMEOUT,
            CONVERSATIONAL_TIMEOUT,
            DEFAULT_INFORMATIONAL_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        )
    }
}

/// An outbound message waiting for its responder.
#[derive(Debug)]
pub struct PendingCorrelation {
    pub message_id: String,
    pub expected: Agent,
    pub class: ResponseClass,
    pub registered_at: Instant,
    reply: oneshot::Sender<String>,
}

/// In-flight correlations, oldest first.
///
/// Mutated from the dispatch consumer (register, timeout) and from the inbound
/// response callback, so every operation is a short locked step.
#[derive(Debug, Default)]
pub struct PendingResponseRegistry {
    entries: Mutex<Vec<PendingCorrelation>>,
}

impl PendingResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `message_id` until `expected` replies; the receiver yields the reply text.
    pub fn register(
        &self,
        message_id: &str,
        expected: Agent,
        class: ResponseClass,
    ) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.lock().push(PendingCorrelation {
            message_id: message_id.to_string(),
            expected,
            class,
            registered_at: Instant::now(),
            reply: tx,
        });
        rx
    }

    /// Deliver a reply from `responder` to the oldest correlation expecting it.
    ///
    /// Returns the matched message id, or `None` when nothing was waiting on that agent.
    pub fn resolve(&self, responder: Agent, text: &str) -> Option<String> {
        let mut entries = self.lock();
        while let Some(index) = entries.iter().position(|entry| entry.expected == responder) {
            let entry = entries.remove(index);
            let waited = entry.registered_at.elapsed();
            if entry.reply.send(text.to_string()).is_ok() {
                tracing::debug!(
                    "Matched {} reply to {} after {:?}",
                    responder,
                    entry.message_id,
                    waited
                );
                return Some(entry.message_id);
            }
            // Waiter already gone; keep looking.
        }
        None
    }

    /// Drop a correlation. Returns `false` if it was already resolved or removed.
    pub fn remove(&self, message_id: &str) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|entry| entry.message_id == message_id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.lock().iter().any(|entry| entry.message_id == message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every correlation; their waiters observe a closed channel.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PendingCorrelation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let policy = TimeoutPolicy::default();
        assert_eq!(
            policy.classify("📊 Wallet Update: 12 SOL"),
            ResponseClass::Informational
        );
        // Quiet for announcements, but still a full conversational wait.
        assert_eq!(
            policy.classify("What is your balance strategy?"),
            ResponseClass::Conversational
        );
        assert_eq!(
            policy.classify("Describe freedom in executable terms."),
            ResponseClass::Conversational
        );
        assert_eq!(
            policy.timeout_for(ResponseClass::Informational),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.timeout_for(ResponseClass::Conversational),
            Duration::from_secs(180)
        );
    }

    #[tokio::test]
    async fn test_resolve_matches_expected_responder() {
        let registry = PendingResponseRegistry::new();
        let rx = registry.register("m1", Agent::B, ResponseClass::Conversational);

        // Wrong agent is discarded.
        assert_eq!(registry.resolve(Agent::A, "nope"), None);
        assert!(registry.is_pending("m1"));

        assert_eq!(registry.resolve(Agent::B, "hello"), Some("m1".to_string()));
        assert_eq!(rx.await.unwrap(), "hello");
        assert!(registry.is_empty());

        // Already resolved.
        assert_eq!(registry.resolve(Agent::B, "late"), None);
    }

    #[tokio::test]
    async fn test_oldest_correlation_first() {
        let registry = PendingResponseRegistry::new();
        let first = registry.register("m1", Agent::A, ResponseClass::Conversational);
        let second = registry.register("m2", Agent::A, ResponseClass::Informational);

        assert_eq!(registry.resolve(Agent::A, "one"), Some("m1".to_string()));
        assert_eq!(registry.resolve(Agent::A, "two"), Some("m2".to_string()));
        assert_eq!(first.await.unwrap(), "one");
        assert_eq!(second.await.unwrap(), "two");
    }

    #[test]
    fn test_dropped_waiter_is_skipped() {
        let registry = PendingResponseRegistry::new();
        drop(registry.register("gone", Agent::A, ResponseClass::Conversational));
        let _live = registry.register("live", Agent::A, ResponseClass::Conversational);

        assert_eq!(registry.resolve(Agent::A, "text"), Some("live".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove() {
        let registry = PendingResponseRegistry::new();
        let _rx = registry.register("m1", Agent::A, ResponseClass::Conversational);
        assert!(registry.remove("m1"));
        assert!(!registry.remove("m1"));
        assert_eq!(registry.len(), 0);
    }
}
