//! Mail host monitor and scan subprocess supervisor.
//!
//! [`HostMonitor`] combines an optional OS event channel (such as
//! [`ExitWatchEvents`]) with a fixed-interval process-table poll;
//! [`ScanSupervisor`] turns the resulting host state into start/stop/restart
//! decisions for the scanning subprocess. [`run_monitor`] drives both from one
//! single-threaded loop.

pub mod exit_watch;
pub mod host;
pub mod service;
pub mod supervisor;

pub use exit_watch::ExitWatchEvents;
pub use host::{
    ChannelEvents, DetectionSource, HostEvent, HostEventSource, HostMonitor, HostState,
    HostTransition, HostTransitions, NoEvents, ProcessTable, SysinfoProcessTable,
};
pub use service::run_monitor;
pub use supervisor::{BackoffPolicy, Launcher, ProcessLauncher, ScanState, ScanSupervisor, SupervisorAction};
