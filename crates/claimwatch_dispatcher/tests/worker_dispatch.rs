//! Dispatcher Tests
//!
//! Real `sh` workers consuming a temporary queue directory.
#![cfg(unix)]

use claimwatch_dispatcher::{run_dispatcher, DispatchOutcome, Dispatcher, ProcessWorkerLauncher, TicketQueue};
use claimwatch_process::{CommandSpec, ShutdownToken};
use claimwatch_protocol::{FailurePolicy, Ticket, WorkerConfig};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn worker(script: &str) -> ProcessWorkerLauncher {
    let spec = CommandSpec::resolve("worker", &["sh".to_string(), "-c".to_string(), script.to_string()], None)
        .expect("sh should be on PATH");
    ProcessWorkerLauncher::new(spec)
}

fn config(timeout_secs: u64, policy: FailurePolicy) -> WorkerConfig {
    WorkerConfig {
        timeout_secs,
        stop_grace_secs: 1,
        failure_policy: policy,
        ..WorkerConfig::default()
    }
}

fn open_queue(root: &Path) -> TicketQueue {
    TicketQueue::open(root.join("queue")).unwrap()
}

#[test]
fn test_worker_receives_ticket_environment() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("seen.txt");
    let script = format!(
        "printf '%s|%s|%s' \"$CLAIMWATCH_TICKET_ID\" \"$CLAIMWATCH_TICKET_KIND\" \"$CLAIMWATCH_TICKET_JSON\" > {}",
        out.display()
    );
    let queue = open_queue(temp.path());
    Ticket::new("claims", "CLM-100").write_to_queue(queue.dir()).unwrap();

    let mut dispatcher = Dispatcher::new(queue, worker(&script), &config(10, FailurePolicy::Drop));
    let outcome = dispatcher.run_once(&ShutdownToken::new()).unwrap();
    assert_eq!(outcome, Some(DispatchOutcome::Completed));

    let seen = fs::read_to_string(&out).unwrap();
    let mut parts = seen.splitn(3, '|');
    assert_eq!(parts.next(), Some("CLM-100"));
    assert_eq!(parts.next(), Some("claims"));
    let payload: Ticket = serde_json::from_str(parts.next().unwrap()).unwrap();
    assert_eq!(payload.id, "CLM-100");
}

#[test]
fn test_ticket_is_gone_before_worker_runs() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path());
    let ticket_path = Ticket::new("claims", "CLM-101").write_to_queue(queue.dir()).unwrap();
    let probe = temp.path().join("probe.txt");
    let script = format!(
        "if [ -e {} ]; then echo present > {}; else echo absent > {}; fi",
        ticket_path.display(),
        probe.display(),
        probe.display()
    );

    let mut dispatcher = Dispatcher::new(queue, worker(&script), &config(10, FailurePolicy::Drop));
    dispatcher.run_once(&ShutdownToken::new()).unwrap();
    assert_eq!(fs::read_to_string(&probe).unwrap().trim(), "absent");
}

#[test]
fn test_hung_worker_is_terminated() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path());
    Ticket::new("claims", "CLM-102").write_to_queue(queue.dir()).unwrap();

    let mut dispatcher = Dispatcher::new(queue, worker("sleep 30"), &config(1, FailurePolicy::DeadLetter));
    let started = Instant::now();
    let outcome = dispatcher.run_once(&ShutdownToken::new()).unwrap();
    assert_eq!(outcome, Some(DispatchOutcome::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(10));

    let counts = dispatcher.queue().counts().unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.failed, 1);
}

#[test]
fn test_service_loop_drains_queue_and_stops() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(temp.path());
    let marker_dir = temp.path().join("done");
    fs::create_dir_all(&marker_dir).unwrap();
    for id in ["a", "b", "c"] {
        Ticket::new("claims", id).write_to_queue(queue.dir()).unwrap();
    }
    fs::write(queue.dir().join("ticket_claims_garbage.json"), b"{}").unwrap();

    let script = format!("touch {}/\"$CLAIMWATCH_TICKET_ID\"", marker_dir.display());
    let mut dispatcher = Dispatcher::new(queue, worker(&script), &config(10, FailurePolicy::Drop));
    let shutdown = ShutdownToken::new();
    let stopper = {
        let shutdown = shutdown.clone();
        let marker_dir = marker_dir.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            while Instant::now() < deadline && fs::read_dir(&marker_dir).unwrap().count() < 3 {
                std::thread::sleep(Duration::from_millis(50));
            }
            shutdown.request();
        })
    };

    run_dispatcher(&mut dispatcher, Duration::from_millis(100), &shutdown).unwrap();
    stopper.join().unwrap();

    for id in ["a", "b", "c"] {
        assert!(marker_dir.join(id).exists(), "ticket {} not processed", id);
    }
    let counts = dispatcher.queue().counts().unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.quarantined, 1);
}
