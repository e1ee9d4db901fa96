//! Time-windowed suppression of repeated broadcast announcements.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Default window a key stays active.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Substrings of telemetry broadcasts that are never announced.
pub const DEFAULT_QUIET_MARKERS: &[&str] = &["balance", "Reporting wallet", "📊"];

pub struct Deduplicator {
    window: Duration,
    seen: HashMap<String, Instant>,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Record `text` and report whether it should be announced.
    ///
    /// Returns `false` when the same normalized text was first seen less than one window
    /// ago. A repeat does not extend the window.
    pub fn observe(&mut self, text: &str) -> bool {
        let now = Instant::now();
        self.evict_expired(now);

        let key = normalize(text);
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, now);
        true
    }

    /// Number of keys still inside their window.
    pub fn active(&mut self) -> usize {
        self.evict_expired(Instant::now());
        self.seen.len()
    }

    fn evict_expired(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) < window);
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

/// Trim and collapse internal whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
