//! Error types for Duologue.

use std::time::Duration;

use thiserror::Error;

use crate::core::types::Agent;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Push channel used before `register_channels`.
    #[error("{0} channel not initialized, register channels first")]
    TransportNotReady(Agent),

    #[error("{responder} response timeout ({}s)", .waited.as_secs())]
    ResponseTimeout { responder: Agent, waited: Duration },

    #[error("Send failed: {0}")]
    SendFailure(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Queue error: {0}")]
    Queue(String),

    /// The dispatcher went away before the item settled.
    #[error("Dispatcher closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the retry policy may re-enqueue after this failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ResponseTimeout { .. })
    }
}
