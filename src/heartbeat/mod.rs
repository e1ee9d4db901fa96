//! Periodic prompt loop.

pub mod prompts;
pub mod scheduler;

pub use prompts::BUILTIN_PROMPTS;
pub use scheduler::{LoopHandle, LoopOptions, LoopScheduler};
