//! Process plumbing shared by the claimwatch services.
//!
//! - [`CommandSpec`] resolves a configured command once at startup and fails
//!   fast when the executable is missing.
//! - [`GroupChild`] is a child spawned in its own process group so that
//!   termination signals aimed at it never reach its launcher.
//! - [`ShutdownToken`] is the cooperative stop flag every control loop polls.

pub mod child;
pub mod command;
pub mod shutdown;

pub use child::{wait_for_exit, ExitOutcome, GroupChild, ManagedChild, StdioMode, StopOutcome, WaitOutcome};
pub use command::{CommandSpec, LaunchError};
pub use shutdown::{deadline_after, install_signal_handlers, ShutdownToken, MAX_WAIT};
