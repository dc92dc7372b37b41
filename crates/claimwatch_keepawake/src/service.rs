use crate::inhibitor::SleepInhibitor;
use anyhow::{Context, Result};
use claimwatch_process::ShutdownToken;
use std::time::Duration;
use tracing::{info, warn};

/// Keep-awake service main loop.
///
/// Takes the assertion immediately and refreshes it every `interval` until
/// shutdown, then releases it. Failing to take the first assertion is an
/// error; later refresh failures are logged and retried next interval.
pub fn run_keep_awake<I: SleepInhibitor + ?Sized>(
    inhibitor: &mut I,
    interval: Duration,
    shutdown: &ShutdownToken,
) -> Result<()> {
    inhibitor
        .hold()
        .with_context(|| format!("Failed to acquire keep-awake assertion via {}", inhibitor.describe()))?;
    info!("Keep-awake active ({}), refreshing every {:?}", inhibitor.describe(), interval);

    while shutdown.sleep(interval) {
        if let Err(err) = inhibitor.hold() {
            warn!("Keep-awake refresh failed: {}", err);
        }
    }

    inhibitor.release();
    info!("Keep-awake released");
    Ok(())
}
