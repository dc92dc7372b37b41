//! Ticket queue and worker dispatcher.
//!
//! The queue is a plain directory. A ticket is claimed by renaming it into a
//! private `claimed/` directory and deleted before its worker starts, so a
//! ticket runs at most once even if the dispatcher dies mid-flight.

pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod service;

pub use dispatcher::{DispatchOutcome, Dispatcher, ProcessWorkerLauncher, WorkerLauncher};
pub use error::QueueError;
pub use queue::{ClaimedTicket, FailureRecord, QueueCounts, TicketQueue};
pub use service::run_dispatcher;
