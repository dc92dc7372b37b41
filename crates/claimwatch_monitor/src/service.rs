use crate::host::{HostEventSource, HostMonitor, HostState, ProcessTable};
use crate::supervisor::{Launcher, ScanState, ScanSupervisor};
use anyhow::Result;
use claimwatch_process::ShutdownToken;
use std::time::Instant;
use tracing::info;

/// Monitor service main loop.
///
/// Each iteration blocks for at most the monitor's event wait, then feeds the
/// current host state to the supervisor. Returns once shutdown is requested
/// and the scanner has been stopped.
pub fn run_monitor<T, E, L>(
    mut monitor: HostMonitor<T, E>,
    mut supervisor: ScanSupervisor<L>,
    shutdown: &ShutdownToken,
) -> Result<()>
where
    T: ProcessTable,
    E: HostEventSource,
    L: Launcher,
{
    info!("Watching for host process {}", monitor.process_name());

    while !shutdown.is_requested() {
        monitor.step();
        let Some(mut host) = monitor.state() else {
            continue;
        };

        let now = Instant::now();
        if let ScanState::Crashed { restart_at } = supervisor.state() {
            // Fresh look before relaunching; the tracked state may be a poll old
            if now >= restart_at && host.is_running() {
                host = HostState::from_running(monitor.is_host_running());
            }
        }
        supervisor.tick(host, now);
    }

    info!("Shutdown requested, stopping scanner");
    supervisor.shutdown();
    info!("Monitor stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NoEvents;
    use crate::supervisor::BackoffPolicy;
    use claimwatch_process::{ExitOutcome, LaunchError, ManagedChild, StopOutcome};
    use claimwatch_protocol::HostConfig;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Shared {
        host_running: Arc<AtomicBool>,
        launches: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
    }

    impl ProcessTable for Shared {
        fn is_running(&mut self, _process_name: &str) -> bool {
            self.host_running.load(Ordering::SeqCst)
        }
    }

    struct IdleChild(Shared);

    impl ManagedChild for IdleChild {
        fn pid(&self) -> u32 {
            42
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
            Ok(None)
        }

        fn stop(&mut self, _grace: Duration) -> io::Result<StopOutcome> {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
            Ok(StopOutcome::Graceful(ExitOutcome::from_code(0)))
        }
    }

    impl Launcher for Shared {
        type Child = IdleChild;

        fn launch(&mut self) -> Result<IdleChild, LaunchError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(IdleChild(self.clone()))
        }
    }

    #[test]
    fn test_loop_launches_and_stops_on_shutdown() {
        let shared = Shared::default();
        shared.host_running.store(true, Ordering::SeqCst);
        let config = HostConfig {
            poll_interval_ms: 20,
            event_wait_ms: 10,
            ..HostConfig::default()
        };
        let monitor = HostMonitor::new(&config, shared.clone(), NoEvents);
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(1),
            stable_after: Duration::from_secs(60),
            crash_loop_threshold: 5,
        };
        let supervisor = ScanSupervisor::new(shared.clone(), policy, Duration::from_secs(1));
        let shutdown = ShutdownToken::new();

        let stopper = {
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                shutdown.request();
            })
        };
        run_monitor(monitor, supervisor, &shutdown).unwrap();
        stopper.join().unwrap();

        assert_eq!(shared.launches.load(Ordering::SeqCst), 1);
        assert_eq!(shared.stops.load(Ordering::SeqCst), 1);
    }
}
