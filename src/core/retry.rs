//! Bounded retry of timed-out deliveries.

use crate::error::Error;

use super::types::{now_millis, Priority, QueuedItem};

/// Default number of re-enqueues after a timeout.
pub const MAX_RETRIES: u32 = 1;

/// Outcome of a failed delivery.
#[derive(Debug)]
pub enum RetryDecision {
    /// Re-enqueue this replacement item.
    Retry(QueuedItem),
    /// Give up; the item's completion should be rejected with the error.
    Fail(QueuedItem, Error),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide what to do with `item` after it failed with `error`.
    ///
    /// Only response timeouts are retried. The replacement keeps prompt, role, target
    /// and conversation, gets a fresh id and timestamp, the highest priority, and takes
    /// over the original completion.
    pub fn on_failure(&self, item: QueuedItem, error: Error) -> RetryDecision {
        if !error.is_timeout() || item.retry_count >= self.max_retries {
            return RetryDecision::Fail(item, error);
        }

        tracing::info!(
            "Retrying {} (attempt {}/{})",
            item.id,
            item.retry_count + 1,
            self.max_retries
        );

        let QueuedItem {
            prompt,
            role,
            target,
            conversation_id,
            retry_count,
            skip_follow_up,
            class,
            completion,
            ..
        } = item;

        RetryDecision::Retry(QueuedItem {
            id: ulid::Ulid::new().to_string(),
            prompt,
            role,
            target,
            priority: Priority::MAX,
            enqueued_at: now_millis(),
            conversation_id,
            retry_count: retry_count + 1,
            skip_follow_up,
            class,
            completion,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRIES)
    }
}
