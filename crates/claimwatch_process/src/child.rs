use crate::command::{CommandSpec, LaunchError};
use crate::shutdown::{deadline_after, ShutdownToken};
use std::fmt;
use std::io;
use std::process::{Child, ChildStderr, ChildStdout, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Poll interval while waiting on a child
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    /// Terminating signal (Unix only)
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => write!(f, "signal {}", sig),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The child had already exited before the stop request.
    AlreadyExited(ExitOutcome),
    /// The child exited within the grace period.
    Graceful(ExitOutcome),
    /// The grace period elapsed and the group was force-killed.
    Killed(ExitOutcome),
}

impl StopOutcome {
    pub fn exit(&self) -> ExitOutcome {
        match self {
            StopOutcome::AlreadyExited(exit) | StopOutcome::Graceful(exit) | StopOutcome::Killed(exit) => *exit,
        }
    }

    pub fn was_forced(&self) -> bool {
        matches!(self, StopOutcome::Killed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ExitOutcome),
    TimedOut,
    Interrupted,
}

/// A supervised child process.
///
/// Implemented by [`GroupChild`]; tests substitute scripted fakes.
pub trait ManagedChild {
    fn pid(&self) -> u32;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>>;

    /// Ask the child to stop, force-killing it after `grace`.
    fn stop(&mut self, grace: Duration) -> io::Result<StopOutcome>;
}

/// Wait for exit, honoring a timeout and shutdown requests.
///
/// The child is left running on `TimedOut` and `Interrupted`; the caller
/// decides how to stop it.
pub fn wait_for_exit<C: ManagedChild + ?Sized>(
    child: &mut C,
    timeout: Duration,
    shutdown: &ShutdownToken,
) -> io::Result<WaitOutcome> {
    let deadline = deadline_after(Instant::now(), timeout);
    loop {
        if let Some(exit) = child.try_wait()? {
            return Ok(WaitOutcome::Exited(exit));
        }
        if shutdown.is_requested() {
            return Ok(WaitOutcome::Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }
        std::thread::sleep((deadline - now).min(WAIT_POLL_INTERVAL));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// Share the launcher's stdout/stderr.
    Inherit,
    /// Capture stdout/stderr for the caller to read.
    Piped,
}

/// Child process running as the leader of its own process group.
#[derive(Debug)]
pub struct GroupChild {
    child: Child,
    program: String,
}

impl GroupChild {
    pub fn spawn(spec: &CommandSpec, stdio: StdioMode) -> Result<Self, LaunchError> {
        let mut cmd = spec.build();
        cmd.stdin(Stdio::null());
        match stdio {
            StdioMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            StdioMode::Piped => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP);
        }

        let program = spec.program().display().to_string();
        let child = cmd.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                LaunchError::NotFound(program.clone())
            } else {
                LaunchError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;
        debug!("Spawned {} (pid={}) in its own process group", program, child.id());

        Ok(Self { child, program })
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Ask the group to stop without waiting for it.
    ///
    /// Lets a caller signal several children before waiting on any of them.
    pub fn terminate(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.signal_terminate()
    }

    /// Graceful stop request to the whole group.
    ///
    /// Only call while the leader is un-reaped, so the group id cannot have
    /// been recycled.
    #[cfg(unix)]
    fn signal_terminate(&mut self) -> io::Result<()> {
        signal_group(self.child.id(), libc::SIGTERM)
    }

    #[cfg(windows)]
    fn signal_terminate(&mut self) -> io::Result<()> {
        use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
        let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, self.child.id()) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(unix)]
    fn kill_group(&mut self) -> io::Result<()> {
        signal_group(self.child.id(), libc::SIGKILL)
    }

    #[cfg(windows)]
    fn kill_group(&mut self) -> io::Result<()> {
        self.child.kill()
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        // ESRCH: the group is already gone
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

impl ManagedChild for GroupChild {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
        Ok(self.child.try_wait()?.map(ExitOutcome::from))
    }

    fn stop(&mut self, grace: Duration) -> io::Result<StopOutcome> {
        if let Some(exit) = self.try_wait()? {
            return Ok(StopOutcome::AlreadyExited(exit));
        }

        if let Err(err) = self.signal_terminate() {
            warn!(
                "Graceful stop signal to {} (pid={}) failed: {}",
                self.program,
                self.child.id(),
                err
            );
        }

        let deadline = deadline_after(Instant::now(), grace);
        loop {
            if let Some(exit) = self.try_wait()? {
                return Ok(StopOutcome::Graceful(exit));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(WAIT_POLL_INTERVAL));
        }

        warn!(
            "{} (pid={}) did not exit within {:?}, killing process group",
            self.program,
            self.child.id(),
            grace
        );
        self.kill_group()?;
        let status = self.child.wait()?;
        Ok(StopOutcome::Killed(ExitOutcome::from(status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedChild {
        polls_until_exit: u32,
        exit: ExitOutcome,
    }

    impl ManagedChild for ScriptedChild {
        fn pid(&self) -> u32 {
            7
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitOutcome>> {
            if self.polls_until_exit == 0 {
                return Ok(Some(self.exit));
            }
            self.polls_until_exit -= 1;
            Ok(None)
        }

        fn stop(&mut self, _grace: Duration) -> io::Result<StopOutcome> {
            Ok(StopOutcome::Graceful(self.exit))
        }
    }

    #[test]
    fn test_wait_for_exit_reports_exit() {
        let mut child = ScriptedChild {
            polls_until_exit: 2,
            exit: ExitOutcome::from_code(3),
        };
        let outcome = wait_for_exit(&mut child, Duration::from_secs(5), &ShutdownToken::new()).unwrap();
        assert_eq!(outcome, WaitOutcome::Exited(ExitOutcome::from_code(3)));
    }

    #[test]
    fn test_wait_for_exit_times_out() {
        let mut child = ScriptedChild {
            polls_until_exit: u32::MAX,
            exit: ExitOutcome::from_code(0),
        };
        let outcome = wait_for_exit(&mut child, Duration::from_millis(120), &ShutdownToken::new()).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_wait_for_exit_accepts_unbounded_timeout() {
        let mut child = ScriptedChild {
            polls_until_exit: 1,
            exit: ExitOutcome::from_code(0),
        };
        let timeout = Duration::from_secs(u64::MAX);
        let outcome = wait_for_exit(&mut child, timeout, &ShutdownToken::new()).unwrap();
        assert_eq!(outcome, WaitOutcome::Exited(ExitOutcome::from_code(0)));
    }

    #[test]
    fn test_wait_for_exit_interrupted() {
        let mut child = ScriptedChild {
            polls_until_exit: u32::MAX,
            exit: ExitOutcome::from_code(0),
        };
        let shutdown = ShutdownToken::new();
        shutdown.request();
        let outcome = wait_for_exit(&mut child, Duration::from_secs(5), &shutdown).unwrap();
        assert_eq!(outcome, WaitOutcome::Interrupted);
    }

    #[test]
    fn test_exit_outcome_display() {
        assert_eq!(ExitOutcome::from_code(1).to_string(), "exit code 1");
        let signalled = ExitOutcome {
            code: None,
            signal: Some(15),
        };
        assert_eq!(signalled.to_string(), "signal 15");
        assert!(!signalled.success());
    }
}
