//! Helper-process inhibitor against real subprocesses.
#![cfg(unix)]

use claimwatch_keepawake::{CommandInhibitor, SleepInhibitor};
use claimwatch_process::CommandSpec;
use std::time::Duration;

fn helper(script: &str) -> CommandInhibitor {
    let spec = CommandSpec::resolve("keep-awake", &["sh".to_string(), "-c".to_string(), script.to_string()], None)
        .expect("sh should be on PATH");
    CommandInhibitor::new(spec)
}

#[test]
fn test_hold_keeps_one_helper_alive() {
    let mut inhibitor = helper("sleep 30");
    inhibitor.hold().unwrap();
    let pid = inhibitor.helper_pid().unwrap();

    inhibitor.hold().unwrap();
    assert_eq!(inhibitor.helper_pid(), Some(pid));

    inhibitor.release();
    assert_eq!(inhibitor.helper_pid(), None);
}

#[test]
fn test_hold_restarts_dead_helper() {
    let mut inhibitor = helper("exit 0");
    inhibitor.hold().unwrap();
    let first = inhibitor.helper_pid().unwrap();
    std::thread::sleep(Duration::from_millis(200));

    inhibitor.hold().unwrap();
    let second = inhibitor.helper_pid().unwrap();
    assert_ne!(first, second);
    inhibitor.release();
}

#[test]
fn test_release_without_hold_is_noop() {
    let mut inhibitor = helper("sleep 30");
    inhibitor.release();
    assert_eq!(inhibitor.helper_pid(), None);
}
