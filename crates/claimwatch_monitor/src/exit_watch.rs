//! Host exit notifications from the operating system.
//!
//! Once the poll has found the host, its processes are watched through a
//! pidfd on Linux or a process handle on Windows, and the source reports
//! [`HostEvent::Stopped`] as soon as the last watched process exits. Starts
//! are still found by the poll. On other platforms nothing can be watched
//! and the source never reports an event.

use crate::host::{HostEvent, HostEventSource};
use std::time::Duration;
use tracing::debug;

/// Most processes watched at once (the Windows multi-object wait limit).
const MAX_WATCHED: usize = 64;

#[derive(Default)]
pub struct ExitWatchEvents {
    watched: Vec<sys::ExitHandle>,
}

impl ExitWatchEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this platform can watch for process exits at all.
    pub fn is_supported() -> bool {
        sys::SUPPORTED
    }

    /// Number of host processes currently watched.
    pub fn watched(&self) -> usize {
        self.watched.len()
    }
}

impl HostEventSource for ExitWatchEvents {
    fn next_event(&mut self, timeout: Duration) -> Option<HostEvent> {
        if self.watched.is_empty() {
            std::thread::sleep(timeout);
            return None;
        }
        match sys::wait_any(&self.watched, timeout) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                debug!("Waiting on host exit failed: {}; relying on polling", err);
                self.watched.clear();
                return None;
            }
        }
        self.watched.retain(|handle| !handle.has_exited());
        if self.watched.is_empty() {
            Some(HostEvent::Stopped)
        } else {
            None
        }
    }

    fn is_active(&self) -> bool {
        !self.watched.is_empty()
    }

    fn wants_pids(&self) -> bool {
        sys::SUPPORTED
    }

    fn watch(&mut self, pids: &[u32]) {
        self.watched = pids
            .iter()
            .take(MAX_WATCHED)
            .filter_map(|&pid| match sys::ExitHandle::open(pid) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    debug!("Cannot watch host process {} for exit: {}", pid, err);
                    None
                }
            })
            .collect();
        if !self.watched.is_empty() {
            debug!("Watching {} host process(es) for exit", self.watched.len());
        }
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::time::Duration;

    pub const SUPPORTED: bool = true;

    pub struct ExitHandle {
        fd: OwnedFd,
    }

    impl ExitHandle {
        pub fn open(pid: u32) -> io::Result<Self> {
            let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid as libc::pid_t, 0) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                fd: unsafe { OwnedFd::from_raw_fd(fd as RawFd) },
            })
        }

        pub fn has_exited(&self) -> bool {
            matches!(wait_any(std::slice::from_ref(self), Duration::ZERO), Ok(true))
        }
    }

    /// Returns `true` once at least one watched process has exited.
    pub fn wait_any(handles: &[ExitHandle], timeout: Duration) -> io::Result<bool> {
        let mut fds: Vec<libc::pollfd> = handles
            .iter()
            .map(|handle| libc::pollfd {
                fd: handle.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(ready > 0)
    }
}

#[cfg(windows)]
mod sys {
    use std::io;
    use std::time::Duration;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, WaitForMultipleObjects, WaitForSingleObject, PROCESS_SYNCHRONIZE,
    };

    pub const SUPPORTED: bool = true;

    pub struct ExitHandle {
        handle: HANDLE,
    }

    impl ExitHandle {
        pub fn open(pid: u32) -> io::Result<Self> {
            let handle = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, 0, pid) };
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { handle })
        }

        pub fn has_exited(&self) -> bool {
            unsafe { WaitForSingleObject(self.handle, 0) == WAIT_OBJECT_0 }
        }
    }

    impl Drop for ExitHandle {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }

    /// Returns `true` once at least one watched process has exited.
    pub fn wait_any(handles: &[ExitHandle], timeout: Duration) -> io::Result<bool> {
        let raw: Vec<HANDLE> = handles.iter().map(|handle| handle.handle).collect();
        // u32::MAX means INFINITE
        let timeout_ms = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        let result = unsafe { WaitForMultipleObjects(raw.len() as u32, raw.as_ptr(), 0, timeout_ms) };
        if result == WAIT_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(result != WAIT_TIMEOUT)
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod sys {
    use std::io;
    use std::time::Duration;

    pub const SUPPORTED: bool = false;

    pub enum ExitHandle {}

    impl ExitHandle {
        pub fn open(_pid: u32) -> io::Result<Self> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "process exit watching is not available on this platform",
            ))
        }

        pub fn has_exited(&self) -> bool {
            match *self {}
        }
    }

    pub fn wait_any(handles: &[ExitHandle], _timeout: Duration) -> io::Result<bool> {
        match handles.first() {
            Some(handle) => match *handle {},
            None => Ok(false),
        }
    }
}
