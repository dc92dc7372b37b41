//! Scan subprocess supervision.
//!
//! ```text
//! Idle ──host up──▶ Running ──exited on its own──▶ Crashed ──backoff elapsed──▶ Running
//!   ▲                  │                              │
//!   └────host down─────┴──────────host down───────────┘
//! ```

use crate::host::HostState;
use claimwatch_process::{deadline_after, CommandSpec, ExitOutcome, GroupChild, LaunchError, ManagedChild, StdioMode};
use claimwatch_protocol::ScannerConfig;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Starts the scan subprocess.
pub trait Launcher {
    type Child: ManagedChild;

    fn launch(&mut self) -> Result<Self::Child, LaunchError>;
}

/// Launches the resolved scanner command in its own process group.
pub struct ProcessLauncher {
    spec: CommandSpec,
}

impl ProcessLauncher {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl Launcher for ProcessLauncher {
    type Child = GroupChild;

    fn launch(&mut self) -> Result<GroupChild, LaunchError> {
        GroupChild::spawn(&self.spec, StdioMode::Inherit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running { pid: u32 },
    Crashed { restart_at: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// A run at least this long resets the crash counter
    pub stable_after: Duration,
    pub crash_loop_threshold: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            base: config.restart_backoff(),
            max: config.max_backoff(),
            stable_after: config.stable_after(),
            crash_loop_threshold: config.crash_loop_threshold,
        }
    }

    /// Restart delay after `consecutive_crashes` crashes in a row.
    pub fn delay_for(&self, consecutive_crashes: u32) -> Duration {
        let exponent = consecutive_crashes.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }
}

/// What a [`ScanSupervisor::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Launched { pid: u32 },
    Stopped { pid: u32, forced: bool },
    Crashed {
        pid: u32,
        exit: Option<ExitOutcome>,
        restart_in: Duration,
    },
    /// The host went down while waiting out a backoff.
    RestartSkipped,
    LaunchFailed { restart_in: Duration },
}

pub struct ScanSupervisor<L: Launcher> {
    launcher: L,
    policy: BackoffPolicy,
    stop_grace: Duration,
    state: ScanState,
    child: Option<L::Child>,
    started_at: Option<Instant>,
    consecutive_crashes: u32,
    alerted: bool,
}

impl<L: Launcher> ScanSupervisor<L> {
    pub fn new(launcher: L, policy: BackoffPolicy, stop_grace: Duration) -> Self {
        Self {
            launcher,
            policy,
            stop_grace,
            state: ScanState::Idle,
            child: None,
            started_at: None,
            consecutive_crashes: 0,
            alerted: false,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn consecutive_crashes(&self) -> u32 {
        self.consecutive_crashes
    }

    pub fn in_crash_loop(&self) -> bool {
        self.consecutive_crashes >= self.policy.crash_loop_threshold
    }

    /// Reconcile the subprocess with the host state.
    ///
    /// Safe to call repeatedly with the same host state: at most one
    /// subprocess is ever running.
    pub fn tick(&mut self, host: HostState, now: Instant) -> Option<SupervisorAction> {
        match self.state {
            ScanState::Idle => {
                if host.is_running() {
                    Some(self.launch(now))
                } else {
                    None
                }
            }
            ScanState::Running { pid } => self.tick_running(pid, host, now),
            ScanState::Crashed { restart_at } => {
                if !host.is_running() {
                    info!("Host stopped during restart backoff; scanner stays idle");
                    self.state = ScanState::Idle;
                    self.reset_crashes();
                    Some(SupervisorAction::RestartSkipped)
                } else if now >= restart_at {
                    Some(self.launch(now))
                } else {
                    None
                }
            }
        }
    }

    fn tick_running(&mut self, pid: u32, host: HostState, now: Instant) -> Option<SupervisorAction> {
        let exited = match self.child.as_mut().map(|child| child.try_wait()) {
            Some(Ok(exited)) => exited,
            Some(Err(err)) => {
                warn!("Failed to poll scanner (pid={}): {}", pid, err);
                None
            }
            None => None,
        };

        if let Some(exit) = exited {
            self.child = None;
            let ran_for = self.started_at.map(|started| now.saturating_duration_since(started));
            if !host.is_running() {
                info!("Scanner (pid={}) exited with {} after host stopped", pid, exit);
                self.state = ScanState::Idle;
                self.reset_crashes();
                return Some(SupervisorAction::Stopped { pid, forced: false });
            }
            let restart_in = self.record_crash(now, ran_for);
            warn!(
                "Scanner (pid={}) exited with {} while host running; restarting in {:?}",
                pid, exit, restart_in
            );
            return Some(SupervisorAction::Crashed {
                pid,
                exit: Some(exit),
                restart_in,
            });
        }

        if !host.is_running() {
            return self.stop_child(pid);
        }

        if self.consecutive_crashes > 0 {
            if let Some(started) = self.started_at {
                if now.saturating_duration_since(started) >= self.policy.stable_after {
                    debug!("Scanner (pid={}) stable; clearing crash counter", pid);
                    self.reset_crashes();
                }
            }
        }
        None
    }

    fn launch(&mut self, now: Instant) -> SupervisorAction {
        match self.launcher.launch() {
            Ok(child) => {
                let pid = child.pid();
                self.child = Some(child);
                self.started_at = Some(now);
                self.state = ScanState::Running { pid };
                info!("Scanner launched (pid={})", pid);
                SupervisorAction::Launched { pid }
            }
            Err(err) => {
                let restart_in = self.record_crash(now, None);
                error!("Scanner launch failed: {}; retrying in {:?}", err, restart_in);
                SupervisorAction::LaunchFailed { restart_in }
            }
        }
    }

    fn stop_child(&mut self, pid: u32) -> Option<SupervisorAction> {
        let forced = match self.child.take() {
            Some(mut child) => match child.stop(self.stop_grace) {
                Ok(outcome) => {
                    info!("Scanner (pid={}) stopped: {}", pid, outcome.exit());
                    outcome.was_forced()
                }
                Err(err) => {
                    error!("Failed to stop scanner (pid={}): {}", pid, err);
                    true
                }
            },
            None => false,
        };
        self.state = ScanState::Idle;
        self.started_at = None;
        Some(SupervisorAction::Stopped { pid, forced })
    }

    fn record_crash(&mut self, now: Instant, ran_for: Option<Duration>) -> Duration {
        if ran_for.is_some_and(|ran| ran >= self.policy.stable_after) {
            self.reset_crashes();
        }
        self.consecutive_crashes = self.consecutive_crashes.saturating_add(1);
        self.started_at = None;

        let delay = self.policy.delay_for(self.consecutive_crashes);
        if self.in_crash_loop() && !self.alerted {
            error!(
                "Scanner crash loop: {} consecutive crashes, restarts continue every {:?}",
                self.consecutive_crashes, delay
            );
            self.alerted = true;
        }
        self.state = ScanState::Crashed {
            restart_at: deadline_after(now, delay),
        };
        delay
    }

    fn reset_crashes(&mut self) {
        self.consecutive_crashes = 0;
        self.alerted = false;
    }

    /// Stop a running scanner, if any.
    pub fn shutdown(&mut self) -> Option<SupervisorAction> {
        match self.state {
            ScanState::Running { pid } => self.stop_child(pid),
            _ => {
                self.state = ScanState::Idle;
                None
            }
        }
    }
}
