//! Observational UI sink.
//!
//! The dispatcher reports what a chat view would show: echoed prompts, agent replies,
//! and "waiting for reply" indicators. Nothing here feeds back into dispatch.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::types::Role;

/// A line in the chat view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiMessage {
    pub role: Role,
    pub text: String,
    /// Unix ms
    pub time: i64,
}

impl UiMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            time: crate::core::types::now_millis(),
        }
    }
}

/// Handle for a "reply pending" indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingToken(pub u64);

pub trait UiSink: Send + Sync {
    fn append_message(&self, message: UiMessage);

    fn begin_pending(&self, role: Role) -> PendingToken;

    fn end_pending(&self, token: PendingToken);
}

/// Sink that writes the chat view into the log.
#[derive(Debug, Default)]
pub struct TracingUi {
    next_token: AtomicU64,
}

impl TracingUi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UiSink for TracingUi {
    fn append_message(&self, message: UiMessage) {
        tracing::info!(target: "duologue::chat", role = %message.role, "{}", message.text);
    }

    fn begin_pending(&self, role: Role) -> PendingToken {
        let token = PendingToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(target: "duologue::chat", "{} is typing ({:?})", role, token);
        token
    }

    fn end_pending(&self, token: PendingToken) {
        tracing::debug!(target: "duologue::chat", "Pending {:?} cleared", token);
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUi;

impl UiSink for NullUi {
    fn append_message(&self, _message: UiMessage) {}

    fn begin_pending(&self, _role: Role) -> PendingToken {
        PendingToken(0)
    }

    fn end_pending(&self, _token: PendingToken) {}
}
