//! Core module - queue, conversations and the dispatcher.
//!
//! This module contains the heart of Duologue's message processing:
//! - In-memory priority queue
//! - Conversation depth tracking and follow-up synthesis
//! - Announcement dedup and timeout retry
//! - The single-consumer dispatcher tying them together

pub mod conversation;
pub mod dedup;
pub mod dispatcher;
pub mod queue;
pub mod retry;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherConfig, WeakDispatcher};
pub use queue::{DispatchQueue, QueueStats};
pub use types::{Agent, AgentReply, Priority, QueuedItem, Role, SubmitOptions};
