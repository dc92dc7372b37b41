use crate::dispatcher::{Dispatcher, WorkerLauncher};
use anyhow::{Context, Result};
use claimwatch_process::ShutdownToken;
use std::time::Duration;
use tracing::{error, info};

/// Pause after a failed cycle before touching the queue again
pub const ERROR_PAUSE: Duration = Duration::from_secs(2);

/// Dispatcher service main loop.
///
/// Drains the queue one ticket at a time, then sleeps `poll_interval` between
/// empty polls. Cycle errors are logged and the loop carries on.
pub fn run_dispatcher<W: WorkerLauncher>(
    dispatcher: &mut Dispatcher<W>,
    poll_interval: Duration,
    shutdown: &ShutdownToken,
) -> Result<()> {
    dispatcher
        .queue()
        .ensure_dirs()
        .context("Failed to prepare queue directory")?;
    let lost = dispatcher
        .queue()
        .recover_stale_claims()
        .context("Failed to recover stale claims")?;
    if !lost.is_empty() {
        info!("Moved {} interrupted claim(s) to failed/", lost.len());
    }
    info!("Dispatching tickets from {}", dispatcher.queue().dir().display());

    while !shutdown.is_requested() {
        match dispatcher.run_once(shutdown) {
            Ok(Some(_)) => continue,
            Ok(None) => {
                shutdown.sleep(poll_interval);
            }
            Err(err) => {
                error!("Dispatch cycle failed: {}", err);
                shutdown.sleep(ERROR_PAUSE);
            }
        }
    }

    info!("Dispatcher stopped");
    Ok(())
}
