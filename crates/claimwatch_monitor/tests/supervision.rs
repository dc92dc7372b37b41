//! Supervision against real subprocesses.
#![cfg(unix)]

use claimwatch_monitor::{
    BackoffPolicy, HostMonitor, HostState, NoEvents, ProcessLauncher, ProcessTable, ScanState, ScanSupervisor,
    SupervisorAction,
};
use claimwatch_process::CommandSpec;
use claimwatch_protocol::HostConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct SwitchTable(Arc<AtomicBool>);

impl ProcessTable for SwitchTable {
    fn is_running(&mut self, _process_name: &str) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn scanner(script: &str) -> ProcessLauncher {
    let spec = CommandSpec::resolve("scanner", &["sh".to_string(), "-c".to_string(), script.to_string()], None)
        .expect("sh should be on PATH");
    ProcessLauncher::new(spec)
}

fn policy() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(100),
        max: Duration::from_secs(1),
        stable_after: Duration::from_secs(60),
        crash_loop_threshold: 5,
    }
}

fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[test]
fn test_host_stop_gracefully_stops_scanner() {
    let mut sup = ScanSupervisor::new(scanner("sleep 30"), policy(), Duration::from_secs(5));
    let t0 = Instant::now();

    let pid = match sup.tick(HostState::Running, t0) {
        Some(SupervisorAction::Launched { pid }) => pid,
        other => panic!("expected launch, got {:?}", other),
    };
    assert!(pid_alive(pid));

    let stop_started = Instant::now();
    let action = sup.tick(HostState::Stopped, Instant::now());
    assert_eq!(action, Some(SupervisorAction::Stopped { pid, forced: false }));
    assert!(stop_started.elapsed() < Duration::from_secs(5));
    assert_eq!(sup.state(), ScanState::Idle);
    assert!(!pid_alive(pid), "scanner should be reaped");

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(sup.tick(HostState::Stopped, Instant::now()), None);
    assert_eq!(sup.state(), ScanState::Idle);
}

#[test]
fn test_crashing_scanner_is_restarted_after_backoff() {
    let mut sup = ScanSupervisor::new(scanner("exit 3"), policy(), Duration::from_secs(1));
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut crashes = Vec::new();
    let mut launches = 0;

    while crashes.len() < 2 && Instant::now() < deadline {
        match sup.tick(HostState::Running, Instant::now()) {
            Some(SupervisorAction::Launched { .. }) => launches += 1,
            Some(SupervisorAction::Crashed { exit, restart_in, .. }) => {
                assert_eq!(exit.and_then(|e| e.code), Some(3));
                crashes.push(restart_in);
            }
            _ => {}
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(crashes, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    assert_eq!(launches, 2);
    sup.shutdown();
}

#[test]
fn test_polling_detects_host_within_one_interval() {
    let table = SwitchTable::default();
    let config = HostConfig {
        poll_interval_ms: 300,
        event_wait_ms: 50,
        ..HostConfig::default()
    };
    let mut monitor = HostMonitor::new(&config, table.clone(), NoEvents);
    assert_eq!(monitor.step().map(|t| t.state), Some(HostState::Stopped));

    table.0.store(true, Ordering::SeqCst);
    let flipped = Instant::now();
    loop {
        if let Some(transition) = monitor.step() {
            assert_eq!(transition.state, HostState::Running);
            break;
        }
        assert!(flipped.elapsed() < Duration::from_secs(2), "transition never detected");
    }
    assert!(flipped.elapsed() <= Duration::from_millis(300 + 100));
}
