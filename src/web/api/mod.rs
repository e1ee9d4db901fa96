//! API endpoints module.

pub mod dispatch;
pub mod relay;

pub use dispatch::{agent_response, status, submit, ApiError};
pub use relay::{publish_custom_message, stream_custom_messages};
