//! One-shot utility commands.

pub mod config;
pub mod enqueue;
pub mod status;
