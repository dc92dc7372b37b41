//! Service entry points: resolve configuration into running loops.
//!
//! Every external executable is resolved here, once, before a loop starts.
//! A missing one surfaces as a fatal [`claimwatch_process::LaunchError`].

use anyhow::{Context, Result};
use claimwatch_dispatcher::{run_dispatcher, Dispatcher, ProcessWorkerLauncher, TicketQueue};
use claimwatch_keepawake::{platform_inhibitor, run_keep_awake};
use claimwatch_monitor::{
    run_monitor, BackoffPolicy, ExitWatchEvents, HostMonitor, ProcessLauncher, ScanSupervisor, SysinfoProcessTable,
};
use claimwatch_process::{CommandSpec, ShutdownToken};
use claimwatch_protocol::WatchConfig;
use tracing::info;

pub fn monitor(config: &WatchConfig, shutdown: &ShutdownToken) -> Result<()> {
    let scanner = &config.scanner;
    let spec = CommandSpec::resolve("scanner", &scanner.command, scanner.working_dir.as_deref())
        .context("Scanner command is not usable")?;
    info!("Scanner command: {}", spec.display());

    if ExitWatchEvents::is_supported() {
        info!(
            "Watching {} exits through the OS; detecting starts by polling every {:?}",
            config.host.process_name,
            config.host.poll_interval()
        );
    } else {
        info!(
            "No process event subscription available; detecting {} by polling every {:?}",
            config.host.process_name,
            config.host.poll_interval()
        );
    }
    let monitor = HostMonitor::new(&config.host, SysinfoProcessTable::new(), ExitWatchEvents::new());
    let supervisor = ScanSupervisor::new(
        ProcessLauncher::new(spec),
        BackoffPolicy::from_config(scanner),
        scanner.stop_grace(),
    );
    run_monitor(monitor, supervisor, shutdown)
}

pub fn dispatch(config: &WatchConfig, shutdown: &ShutdownToken) -> Result<()> {
    let worker = &config.worker;
    let spec = CommandSpec::resolve("worker", &worker.command, worker.working_dir.as_deref())
        .context("Worker command is not usable")?;
    info!(
        "Worker command: {} (timeout {:?}, failure policy {:?})",
        spec.display(),
        worker.timeout(),
        worker.failure_policy
    );

    let queue = TicketQueue::open(config.queue_dir()).context("Failed to open ticket queue")?;
    let mut dispatcher = Dispatcher::new(queue, ProcessWorkerLauncher::new(spec), worker);
    run_dispatcher(&mut dispatcher, config.queue.poll_interval(), shutdown)
}

pub fn keep_awake(config: &WatchConfig, shutdown: &ShutdownToken) -> Result<()> {
    if !config.keep_awake.enabled {
        info!("Keep-awake disabled in configuration");
        return Ok(());
    }
    let mut inhibitor = platform_inhibitor().context("Keep-awake helper is not available")?;
    run_keep_awake(inhibitor.as_mut(), config.keep_awake.interval(), shutdown)
}
