use crate::error::QueueError;
use crate::queue::{ClaimedTicket, TicketQueue};
use claimwatch_process::{
    wait_for_exit, CommandSpec, GroupChild, LaunchError, ManagedChild, ShutdownToken, StdioMode, WaitOutcome,
};
use claimwatch_protocol::{FailurePolicy, Ticket, WorkerConfig};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const ENV_TICKET_ID: &str = "CLAIMWATCH_TICKET_ID";
pub const ENV_TICKET_KIND: &str = "CLAIMWATCH_TICKET_KIND";
pub const ENV_TICKET_CREATED_AT: &str = "CLAIMWATCH_TICKET_CREATED_AT";
pub const ENV_TICKET_JSON: &str = "CLAIMWATCH_TICKET_JSON";

/// Starts one worker for one ticket.
pub trait WorkerLauncher {
    type Child: ManagedChild;

    /// `payload` is the ticket encoded as JSON.
    fn launch(&mut self, ticket: &Ticket, payload: &str) -> Result<Self::Child, LaunchError>;
}

/// Runs the configured worker command with the ticket in its environment.
pub struct ProcessWorkerLauncher {
    spec: CommandSpec,
}

impl ProcessWorkerLauncher {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl WorkerLauncher for ProcessWorkerLauncher {
    type Child = GroupChild;

    fn launch(&mut self, ticket: &Ticket, payload: &str) -> Result<GroupChild, LaunchError> {
        let spec = self
            .spec
            .clone()
            .with_env(ENV_TICKET_ID, ticket.id.as_str())
            .with_env(ENV_TICKET_KIND, ticket.kind.as_str())
            .with_env(ENV_TICKET_CREATED_AT, ticket.created_at.to_rfc3339())
            .with_env(ENV_TICKET_JSON, payload);
        GroupChild::spawn(&spec, StdioMode::Inherit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    /// Nonzero exit; `code` is `None` when the worker died from a signal.
    Failed { code: Option<i32> },
    TimedOut,
    /// Shutdown was requested while the worker ran.
    Interrupted,
    LaunchFailed,
}

/// Sequential dispatcher: one ticket, one worker, at a time.
pub struct Dispatcher<W> {
    queue: TicketQueue,
    launcher: W,
    timeout: Duration,
    stop_grace: Duration,
    failure_policy: FailurePolicy,
}

impl<W: WorkerLauncher> Dispatcher<W> {
    pub fn new(queue: TicketQueue, launcher: W, config: &WorkerConfig) -> Self {
        Self {
            queue,
            launcher,
            timeout: config.timeout(),
            stop_grace: config.stop_grace(),
            failure_policy: config.failure_policy,
        }
    }

    pub fn queue(&self) -> &TicketQueue {
        &self.queue
    }

    /// Claim the next ticket and run its worker.
    ///
    /// Returns `None` when the queue is empty.
    pub fn run_once(&mut self, shutdown: &ShutdownToken) -> Result<Option<DispatchOutcome>, QueueError> {
        match self.queue.claim_next()? {
            Some(claimed) => Ok(Some(self.dispatch(&claimed, shutdown))),
            None => Ok(None),
        }
    }

    /// Run the worker for an already-claimed ticket and wait for it.
    pub fn dispatch(&mut self, claimed: &ClaimedTicket, shutdown: &ShutdownToken) -> DispatchOutcome {
        let ticket = &claimed.ticket;
        let payload = match ticket.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                error!("Cannot encode ticket {}: {}", claimed.name, err);
                self.handle_failure(claimed, &err.to_string());
                return DispatchOutcome::LaunchFailed;
            }
        };

        let mut child = match self.launcher.launch(ticket, &payload) {
            Ok(child) => child,
            Err(err) => {
                error!("Worker launch for ticket {} failed: {}", ticket.id, err);
                self.handle_failure(claimed, &format!("launch failed: {}", err));
                return DispatchOutcome::LaunchFailed;
            }
        };
        let pid = child.pid();
        info!("Dispatched ticket {} ({}) to worker pid={}", ticket.id, ticket.kind, pid);

        let started = Instant::now();
        let waited = match wait_for_exit(&mut child, self.timeout, shutdown) {
            Ok(waited) => waited,
            Err(err) => {
                error!("Lost track of worker pid={} for ticket {}: {}", pid, ticket.id, err);
                self.stop_worker(&mut child);
                self.handle_failure(claimed, &format!("wait failed: {}", err));
                return DispatchOutcome::Failed { code: None };
            }
        };

        match waited {
            WaitOutcome::Exited(exit) if exit.success() => {
                info!("Ticket {} completed in {:.1?}", ticket.id, started.elapsed());
                DispatchOutcome::Completed
            }
            WaitOutcome::Exited(exit) => {
                error!("Worker for ticket {} failed with {}", ticket.id, exit);
                self.handle_failure(claimed, &exit.to_string());
                DispatchOutcome::Failed { code: exit.code }
            }
            WaitOutcome::TimedOut => {
                error!("Worker for ticket {} exceeded {:?}; terminating", ticket.id, self.timeout);
                self.stop_worker(&mut child);
                self.handle_failure(claimed, &format!("timed out after {:?}", self.timeout));
                DispatchOutcome::TimedOut
            }
            WaitOutcome::Interrupted => {
                warn!("Shutdown requested; stopping worker for ticket {}", ticket.id);
                self.stop_worker(&mut child);
                self.handle_failure(claimed, "interrupted by shutdown");
                DispatchOutcome::Interrupted
            }
        }
    }

    fn stop_worker(&self, child: &mut W::Child) {
        let pid = child.pid();
        match child.stop(self.stop_grace) {
            Ok(outcome) if outcome.was_forced() => warn!("Worker pid={} killed", pid),
            Ok(outcome) => info!("Worker pid={} stopped: {}", pid, outcome.exit()),
            Err(err) => error!("Failed to stop worker pid={}: {}", pid, err),
        }
    }

    fn handle_failure(&self, claimed: &ClaimedTicket, reason: &str) {
        match self.failure_policy {
            FailurePolicy::Drop => {
                warn!("Dropping ticket {} ({}): {}", claimed.ticket.id, claimed.name, reason);
            }
            FailurePolicy::DeadLetter => match self.queue.write_failure(claimed, reason) {
                Ok(path) => warn!("Ticket {} failed: {}; saved to {}", claimed.ticket.id, reason, path.display()),
                Err(err) => error!("Ticket {} failed ({}) and could not be saved: {}", claimed.ticket.id, reason, err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimwatch_process::{ExitOutcome, StopOutcome};
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum Script {
        ExitAfter { polls: u32, code: i32 },
        Hang,
    }

    #[derive(Default)]
    struct Record {
        launched: Vec<(String, String)>,
        stopped: u32,
    }

    struct FakeWorker {
        script: Script,
        polls: u32,
        record: Rc<RefCell<Record>>,
    }

    impl ManagedChild for FakeWorker {
        fn pid(&self) -> u32 {
            9
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
            self.polls += 1;
            match self.script {
                Script::ExitAfter { polls, code } if self.polls > polls => Ok(Some(ExitOutcome::from_code(code))),
                _ => Ok(None),
            }
        }

        fn stop(&mut self, _grace: Duration) -> io::Result<StopOutcome> {
            self.record.borrow_mut().stopped += 1;
            Ok(StopOutcome::Killed(ExitOutcome {
                code: None,
                signal: Some(9),
            }))
        }
    }

    struct FakeLauncher {
        script: Option<Script>,
        record: Rc<RefCell<Record>>,
    }

    impl WorkerLauncher for FakeLauncher {
        type Child = FakeWorker;

        fn launch(&mut self, ticket: &Ticket, payload: &str) -> Result<FakeWorker, LaunchError> {
            let script = self
                .script
                .ok_or_else(|| LaunchError::NotFound("worker".to_string()))?;
            self.record
                .borrow_mut()
                .launched
                .push((ticket.id.clone(), payload.to_string()));
            Ok(FakeWorker {
                script,
                polls: 0,
                record: self.record.clone(),
            })
        }
    }

    fn setup(
        script: Option<Script>,
        policy: FailurePolicy,
    ) -> (TempDir, Dispatcher<FakeLauncher>, Rc<RefCell<Record>>) {
        let temp = TempDir::new().unwrap();
        let queue = TicketQueue::open(temp.path().join("queue")).unwrap();
        let record = Rc::new(RefCell::new(Record::default()));
        let launcher = FakeLauncher {
            script,
            record: record.clone(),
        };
        let config = WorkerConfig {
            timeout_secs: 1,
            stop_grace_secs: 1,
            failure_policy: policy,
            ..WorkerConfig::default()
        };
        (temp, Dispatcher::new(queue, launcher, &config), record)
    }

    fn enqueue(dispatcher: &Dispatcher<FakeLauncher>, id: &str) {
        Ticket::new("claims", id)
            .with_metadata("source", "inbox")
            .write_to_queue(dispatcher.queue().dir())
            .unwrap();
    }

    #[test]
    fn test_successful_dispatch_passes_payload() {
        let (_temp, mut dispatcher, record) =
            setup(Some(Script::ExitAfter { polls: 1, code: 0 }), FailurePolicy::Drop);
        enqueue(&dispatcher, "CLM-1");

        let outcome = dispatcher.run_once(&ShutdownToken::new()).unwrap();
        assert_eq!(outcome, Some(DispatchOutcome::Completed));

        let record = record.borrow();
        assert_eq!(record.launched.len(), 1);
        let (id, payload) = &record.launched[0];
        assert_eq!(id, "CLM-1");
        let decoded: Ticket = serde_json::from_str(payload).unwrap();
        assert_eq!(decoded.metadata["source"], "inbox");
        assert_eq!(dispatcher.queue().counts().unwrap().pending, 0);
    }

    #[test]
    fn test_unbounded_timeout_still_completes() {
        let temp = TempDir::new().unwrap();
        let queue = TicketQueue::open(temp.path().join("queue")).unwrap();
        let launcher = FakeLauncher {
            script: Some(Script::ExitAfter { polls: 2, code: 0 }),
            record: Rc::new(RefCell::new(Record::default())),
        };
        let config = WorkerConfig {
            timeout_secs: u64::MAX,
            ..WorkerConfig::default()
        };
        let mut dispatcher = Dispatcher::new(queue, launcher, &config);
        enqueue(&dispatcher, "CLM-9");

        let outcome = dispatcher.run_once(&ShutdownToken::new()).unwrap();
        assert_eq!(outcome, Some(DispatchOutcome::Completed));
    }

    #[test]
    fn test_empty_queue_returns_none() {
        let (_temp, mut dispatcher, record) =
            setup(Some(Script::ExitAfter { polls: 0, code: 0 }), FailurePolicy::Drop);
        assert_eq!(dispatcher.run_once(&ShutdownToken::new()).unwrap(), None);
        assert!(record.borrow().launched.is_empty());
    }

    #[test]
    fn test_nonzero_exit_is_not_retried() {
        let (_temp, mut dispatcher, record) =
            setup(Some(Script::ExitAfter { polls: 0, code: 3 }), FailurePolicy::Drop);
        enqueue(&dispatcher, "CLM-2");

        let shutdown = ShutdownToken::new();
        assert_eq!(
            dispatcher.run_once(&shutdown).unwrap(),
            Some(DispatchOutcome::Failed { code: Some(3) })
        );
        assert_eq!(dispatcher.run_once(&shutdown).unwrap(), None);
        assert_eq!(record.borrow().launched.len(), 1);
        assert_eq!(dispatcher.queue().counts().unwrap().failed, 0);
    }

    #[test]
    fn test_dead_letter_policy_records_failure() {
        let (_temp, mut dispatcher, _record) =
            setup(Some(Script::ExitAfter { polls: 0, code: 4 }), FailurePolicy::DeadLetter);
        enqueue(&dispatcher, "CLM-3");

        dispatcher.run_once(&ShutdownToken::new()).unwrap();
        let counts = dispatcher.queue().counts().unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_timeout_stops_worker() {
        let (_temp, mut dispatcher, record) = setup(Some(Script::Hang), FailurePolicy::DeadLetter);
        enqueue(&dispatcher, "CLM-4");

        let started = Instant::now();
        let outcome = dispatcher.run_once(&ShutdownToken::new()).unwrap();
        assert_eq!(outcome, Some(DispatchOutcome::TimedOut));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(record.borrow().stopped, 1);
        assert_eq!(dispatcher.queue().counts().unwrap().failed, 1);
    }

    #[test]
    fn test_shutdown_interrupts_worker() {
        let (_temp, mut dispatcher, record) = setup(Some(Script::Hang), FailurePolicy::Drop);
        enqueue(&dispatcher, "CLM-5");

        let shutdown = ShutdownToken::new();
        shutdown.request();
        let outcome = dispatcher.run_once(&shutdown).unwrap();
        assert_eq!(outcome, Some(DispatchOutcome::Interrupted));
        assert_eq!(record.borrow().stopped, 1);
    }

    #[test]
    fn test_launch_failure_consumes_ticket() {
        let (_temp, mut dispatcher, _record) = setup(None, FailurePolicy::Drop);
        enqueue(&dispatcher, "CLM-6");

        let shutdown = ShutdownToken::new();
        assert_eq!(
            dispatcher.run_once(&shutdown).unwrap(),
            Some(DispatchOutcome::LaunchFailed)
        );
        assert_eq!(dispatcher.run_once(&shutdown).unwrap(), None);
    }
}
