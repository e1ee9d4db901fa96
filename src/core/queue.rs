//! In-memory priority queue for outbound prompts.
//!
//! Ordering:
//! - higher priority first
//! - within a priority, earlier enqueue time first (ties keep arrival order)

use std::collections::{HashSet, VecDeque};

use crate::error::Error;

use super::types::{Priority, QueuedItem};

/// Pending outbound items, drained by the single dispatch consumer.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    items: VecDeque<QueuedItem>,
    ids: HashSet<String>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item at its priority position.
    ///
    /// An id that is already pending is rejected and its completion settled with the
    /// error.
    pub fn enqueue(&mut self, item: QueuedItem) -> Result<(), Error> {
        if self.ids.contains(&item.id) {
            let message = format!("Item {} already queued", item.id);
            item.completion.reject(Error::Queue(message.clone()));
            return Err(Error::Queue(message));
        }

        let index = self
            .items
            .iter()
            .position(|queued| {
                queued.priority < item.priority
                    || (queued.priority == item.priority && queued.enqueued_at > item.enqueued_at)
            })
            .unwrap_or(self.items.len());

        tracing::debug!(
            "Enqueued {} at position {} (priority {:?}, retry {})",
            item.id,
            index,
            item.priority,
            item.retry_count
        );

        self.ids.insert(item.id.clone());
        self.items.insert(index, item);
        Ok(())
    }

    /// Remove and return the head item.
    pub fn dequeue_next(&mut self) -> Option<QueuedItem> {
        let item = self.items.pop_front()?;
        self.ids.remove(&item.id);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Priority of the head item.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.items.front().map(|item| item.priority)
    }

    /// Queue statistics.
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for item in &self.items {
            match item.priority {
                Priority::Low => stats.low += 1,
                Priority::Normal => stats.normal += 1,
                Priority::High => stats.high += 1,
                Priority::Urgent => stats.urgent += 1,
            }
        }
        stats.total = self.items.len();
        stats
    }

    /// Drain every pending item, highest priority first.
    pub fn drain(&mut self) -> Vec<QueuedItem> {
        self.ids.clear();
        self.items.drain(..).collect()
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub total: usize,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Queue Stats:")?;
        writeln!(f, "  Urgent: {}", self.urgent)?;
        writeln!(f, "  High:   {}", self.high)?;
        writeln!(f, "  Normal: {}", self.normal)?;
        writeln!(f, "  Low:    {}", self.low)?;
        write!(f, "  Total:  {}", self.total)
    }
}
