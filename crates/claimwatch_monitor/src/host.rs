//! Mail host detection.
//!
//! Two independent signal sources feed one state variable:
//!
//! 1. An optional OS event channel ([`HostEventSource`]) that may report a
//!    start/stop immediately, but can be late, drop events or overflow.
//! 2. A fixed-interval poll of the process table ([`ProcessTable`]), which is
//!    authoritative: whenever it disagrees with the last known state, it wins.
//!
//! Each [`HostMonitor::step`] waits on the event channel for a bounded time and
//! then runs the poll if it is due, so neither source starves the other.

use claimwatch_process::{deadline_after, ShutdownToken};
use claimwatch_protocol::HostConfig;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, info};

/// Shortest event wait per step, so a loop over [`HostMonitor::step`] always
/// blocks for a moment.
const MIN_EVENT_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Running,
    Stopped,
}

impl HostState {
    pub fn from_running(running: bool) -> Self {
        if running {
            HostState::Running
        } else {
            HostState::Stopped
        }
    }

    pub fn is_running(self) -> bool {
        self == HostState::Running
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostState::Running => write!(f, "RUNNING"),
            HostState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Notification delivered by an OS event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// First poll after startup
    Initial,
    Event,
    Poll,
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionSource::Initial => write!(f, "initial check"),
            DetectionSource::Event => write!(f, "event"),
            DetectionSource::Poll => write!(f, "poll"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTransition {
    pub state: HostState,
    pub source: DetectionSource,
}

/// "Is a process with this name alive right now?"
pub trait ProcessTable {
    fn is_running(&mut self, process_name: &str) -> bool;

    /// PIDs of the matching processes. Empty when the table cannot tell.
    fn pids(&mut self, _process_name: &str) -> Vec<u32> {
        Vec::new()
    }
}

/// Process table backed by `sysinfo`.
pub struct SysinfoProcessTable {
    system: System,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn is_running(&mut self, process_name: &str) -> bool {
        self.system.refresh_processes();
        self.system
            .processes()
            .values()
            .any(|process| process.name().eq_ignore_ascii_case(process_name))
    }

    fn pids(&mut self, process_name: &str) -> Vec<u32> {
        self.system.refresh_processes();
        self.system
            .processes()
            .iter()
            .filter(|(_, process)| process.name().eq_ignore_ascii_case(process_name))
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }
}

/// Asynchronous start/stop notifications for the host process.
pub trait HostEventSource {
    /// Wait up to `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Option<HostEvent>;

    /// Whether this source can deliver events at all.
    fn is_active(&self) -> bool {
        true
    }

    /// Whether [`HostEventSource::watch`] needs the host's PIDs.
    fn wants_pids(&self) -> bool {
        false
    }

    /// Called on every recorded transition with the PIDs of the running
    /// host, or an empty slice once it stopped.
    fn watch(&mut self, _pids: &[u32]) {}
}

/// Disabled event channel: only the poll detects transitions.
#[derive(Debug, Default)]
pub struct NoEvents;

impl HostEventSource for NoEvents {
    fn next_event(&mut self, timeout: Duration) -> Option<HostEvent> {
        std::thread::sleep(timeout);
        None
    }

    fn is_active(&self) -> bool {
        false
    }
}

/// Event channel fed through an `mpsc` sender by an external subscriber.
pub struct ChannelEvents {
    rx: Receiver<HostEvent>,
    disconnected: bool,
}

impl ChannelEvents {
    pub fn new() -> (Sender<HostEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (
            tx,
            Self {
                rx,
                disconnected: false,
            },
        )
    }
}

impl HostEventSource for ChannelEvents {
    fn next_event(&mut self, timeout: Duration) -> Option<HostEvent> {
        if self.disconnected {
            std::thread::sleep(timeout);
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Host event channel disconnected; relying on polling");
                self.disconnected = true;
                None
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.disconnected
    }
}

pub struct HostMonitor<T, E> {
    process_name: String,
    table: T,
    events: E,
    poll_interval: Duration,
    event_wait: Duration,
    state: Option<HostState>,
    next_poll: Instant,
}

impl<T: ProcessTable, E: HostEventSource> HostMonitor<T, E> {
    pub fn new(config: &HostConfig, table: T, events: E) -> Self {
        Self {
            process_name: config.process_name.clone(),
            table,
            events,
            poll_interval: config.poll_interval(),
            event_wait: config.event_wait().max(MIN_EVENT_WAIT),
            state: None,
            next_poll: Instant::now(),
        }
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Direct process-table check, bypassing the tracked state.
    pub fn is_host_running(&mut self) -> bool {
        self.table.is_running(&self.process_name)
    }

    /// Last known state; `None` until the first poll.
    pub fn state(&self) -> Option<HostState> {
        self.state
    }

    /// One loop iteration: a bounded event wait, then the poll if due.
    ///
    /// Blocks for at most the configured event wait. Returns the transition
    /// detected in this iteration, if any.
    pub fn step(&mut self) -> Option<HostTransition> {
        if self.state.is_some() {
            let until_poll = self.next_poll.saturating_duration_since(Instant::now());
            let wait = self.event_wait.min(until_poll);
            if let Some(event) = self.events.next_event(wait) {
                let state = match event {
                    HostEvent::Started => HostState::Running,
                    HostEvent::Stopped => HostState::Stopped,
                };
                if self.state != Some(state) {
                    // The poll re-checks one full interval later, giving the
                    // process table time to catch up with the event.
                    self.next_poll = deadline_after(Instant::now(), self.poll_interval);
                    return Some(self.record(state, DetectionSource::Event));
                }
            }
        }

        let now = Instant::now();
        if now < self.next_poll {
            return None;
        }
        self.next_poll = deadline_after(now, self.poll_interval);

        let polled = HostState::from_running(self.is_host_running());
        match self.state {
            None => Some(self.record(polled, DetectionSource::Initial)),
            Some(current) if current != polled => {
                if self.events.is_active() {
                    debug!(
                        "Event channel missed host transition to {}; recovered by poll",
                        polled
                    );
                }
                Some(self.record(polled, DetectionSource::Poll))
            }
            Some(_) => None,
        }
    }

    fn record(&mut self, state: HostState, source: DetectionSource) -> HostTransition {
        self.state = Some(state);
        info!("{} {} ({})", self.process_name, state, source);
        if self.events.wants_pids() {
            let pids = if state.is_running() {
                self.table.pids(&self.process_name)
            } else {
                Vec::new()
            };
            self.events.watch(&pids);
        }
        HostTransition { state, source }
    }

    /// Infinite stream of host transitions, ending only on shutdown.
    ///
    /// Consumes the monitor: after cancellation a fresh monitor is needed.
    pub fn transitions(self, shutdown: ShutdownToken) -> HostTransitions<T, E> {
        HostTransitions {
            monitor: self,
            shutdown,
        }
    }
}

pub struct HostTransitions<T, E> {
    monitor: HostMonitor<T, E>,
    shutdown: ShutdownToken,
}

impl<T: ProcessTable, E: HostEventSource> Iterator for HostTransitions<T, E> {
    type Item = HostTransition;

    fn next(&mut self) -> Option<HostTransition> {
        while !self.shutdown.is_requested() {
            if let Some(transition) = self.monitor.step() {
                return Some(transition);
            }
        }
        None
    }
}
