//! Keep-awake service.
//!
//! Holds an OS sleep/display assertion for as long as the service runs and
//! releases it on exit. The assertion mechanism is platform specific, see
//! [`platform_inhibitor`].

pub mod inhibitor;
pub mod service;

pub use inhibitor::{platform_inhibitor, CommandInhibitor, InhibitError, SleepInhibitor};
#[cfg(windows)]
pub use inhibitor::ExecutionStateInhibitor;
pub use service::run_keep_awake;
