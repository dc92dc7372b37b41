//! Canonical default values shared by every service.

pub const DEFAULT_HOST_PROCESS_NAME: &str = "OUTLOOK.EXE";
pub const DEFAULT_HOST_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_EVENT_WAIT_MS: u64 = 250;

pub const DEFAULT_RESTART_BACKOFF_SECS: u64 = 10;
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 300;
pub const DEFAULT_STABLE_AFTER_SECS: u64 = 60;
pub const DEFAULT_CRASH_LOOP_THRESHOLD: u32 = 5;
pub const DEFAULT_STOP_GRACE_SECS: u64 = 5;

pub const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_KEEP_AWAKE_INTERVAL_SECS: u64 = 30;

pub const DEFAULT_SUITE_RESTART_DELAY_SECS: u64 = 2;
pub const DEFAULT_SUITE_MAX_RESTART_DELAY_SECS: u64 = 60;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Upper bound accepted for any configured interval, timeout or grace period.
pub const MAX_CONFIG_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Subdirectory of the queue directory holding tickets mid-claim.
pub const CLAIMED_DIR_NAME: &str = "claimed";
/// Subdirectory of the queue directory holding unparsable tickets.
pub const QUARANTINE_DIR_NAME: &str = "quarantine";
/// Subdirectory of the queue directory holding dead-lettered tickets.
pub const FAILED_DIR_NAME: &str = "failed";

/// Exit code used by a service that cannot start (missing executable, bad config).
pub const FATAL_STARTUP_EXIT_CODE: i32 = 2;
