//! Shared contracts for the claimwatch watcher suite.
//!
//! Everything that crosses a process boundary lives here: the ticket file
//! format exchanged through the queue directory, the configuration file read
//! by every service, and the canonical on-disk locations.

pub mod config;
pub mod defaults;
pub mod error;
pub mod paths;
pub mod ticket;

pub use config::{
    FailurePolicy, HostConfig, KeepAwakeConfig, QueueConfig, ScannerConfig, SuiteConfig,
    WatchConfig, WorkerConfig,
};
pub use error::{ConfigError, TicketError};
pub use ticket::{Ticket, TicketFormat, TicketName};
