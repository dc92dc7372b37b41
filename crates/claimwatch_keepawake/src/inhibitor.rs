use claimwatch_process::{CommandSpec, GroupChild, LaunchError, ManagedChild, StdioMode};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const HELPER_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum InhibitError {
    #[error("Failed to start keep-awake helper: {0}")]
    Launch(#[from] LaunchError),

    #[error("Keep-awake request failed: {0}")]
    Io(#[from] io::Error),
}

/// An OS-level "do not sleep" assertion.
pub trait SleepInhibitor {
    /// Take or refresh the assertion. Calling it while held is cheap.
    fn hold(&mut self) -> Result<(), InhibitError>;

    /// Drop the assertion. Safe to call when nothing is held.
    fn release(&mut self);

    fn describe(&self) -> String;
}

/// Assertion held for as long as a helper process lives
/// (`caffeinate` on macOS, `systemd-inhibit` on Linux).
pub struct CommandInhibitor {
    spec: CommandSpec,
    child: Option<GroupChild>,
}

impl CommandInhibitor {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec, child: None }
    }

    /// `caffeinate -dim`: display, idle and disk sleep prevented.
    pub fn caffeinate() -> Result<Self, LaunchError> {
        let command = ["caffeinate", "-dim"].map(String::from);
        Ok(Self::new(CommandSpec::resolve("keep-awake", &command, None)?))
    }

    /// `systemd-inhibit` blocking idle and sleep around a never-ending sleep.
    pub fn systemd_inhibit() -> Result<Self, LaunchError> {
        let command = [
            "systemd-inhibit",
            "--what=idle:sleep",
            "--who=claimwatch",
            "--why=Mail host automation running",
            "--mode=block",
            "sleep",
            "infinity",
        ]
        .map(String::from);
        Ok(Self::new(CommandSpec::resolve("keep-awake", &command, None)?))
    }

    pub fn helper_pid(&self) -> Option<u32> {
        self.child.as_ref().map(|child| child.pid())
    }
}

impl SleepInhibitor for CommandInhibitor {
    fn hold(&mut self) -> Result<(), InhibitError> {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait()? {
                None => return Ok(()),
                Some(exit) => warn!("Keep-awake helper (pid={}) exited with {}; restarting", child.pid(), exit),
            }
        }
        let child = GroupChild::spawn(&self.spec, StdioMode::Inherit)?;
        debug!("Keep-awake helper started (pid={})", child.pid());
        self.child = Some(child);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.stop(HELPER_STOP_GRACE) {
                warn!("Failed to stop keep-awake helper (pid={}): {}", child.pid(), err);
            }
        }
    }

    fn describe(&self) -> String {
        self.spec.display()
    }
}

impl Drop for CommandInhibitor {
    fn drop(&mut self) {
        self.release();
    }
}

/// `SetThreadExecutionState` on the calling thread.
#[cfg(windows)]
#[derive(Debug, Default)]
pub struct ExecutionStateInhibitor {
    held: bool,
}

#[cfg(windows)]
impl SleepInhibitor for ExecutionStateInhibitor {
    fn hold(&mut self) -> Result<(), InhibitError> {
        use windows_sys::Win32::System::Power::{
            SetThreadExecutionState, ES_AWAYMODE_REQUIRED, ES_CONTINUOUS, ES_DISPLAY_REQUIRED, ES_SYSTEM_REQUIRED,
        };
        let flags = ES_CONTINUOUS | ES_SYSTEM_REQUIRED | ES_DISPLAY_REQUIRED | ES_AWAYMODE_REQUIRED;
        // Returns the previous state, or 0 on failure
        if unsafe { SetThreadExecutionState(flags) } == 0 {
            return Err(io::Error::last_os_error().into());
        }
        self.held = true;
        Ok(())
    }

    fn release(&mut self) {
        use windows_sys::Win32::System::Power::{SetThreadExecutionState, ES_CONTINUOUS};
        if self.held {
            unsafe { SetThreadExecutionState(ES_CONTINUOUS) };
            self.held = false;
        }
    }

    fn describe(&self) -> String {
        "SetThreadExecutionState".to_string()
    }
}

/// The inhibitor for this platform.
///
/// Fails when the required helper executable is not installed.
pub fn platform_inhibitor() -> Result<Box<dyn SleepInhibitor>, LaunchError> {
    #[cfg(windows)]
    {
        Ok(Box::new(ExecutionStateInhibitor::default()))
    }
    #[cfg(target_os = "macos")]
    {
        let inhibitor = CommandInhibitor::caffeinate()?;
        tracing::info!("Using {}", inhibitor.describe());
        Ok(Box::new(inhibitor))
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        let inhibitor = CommandInhibitor::systemd_inhibit()?;
        tracing::info!("Using {}", inhibitor.describe());
        Ok(Box::new(inhibitor))
    }
}
