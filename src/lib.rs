//! Duologue library root.

pub mod cli;
pub mod config;
pub mod core;
pub mod delivery;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod relay;
pub mod transport;
pub mod ui;
pub mod web;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{Agent, AgentReply, Dispatcher, Priority, Role, SubmitOptions};
pub use delivery::{DeliveryStrategy, StrategyKind};
pub use error::{Error, Result};
pub use heartbeat::{LoopHandle, LoopOptions};
pub use relay::Relay;
