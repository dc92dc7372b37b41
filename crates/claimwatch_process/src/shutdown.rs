use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Longest single sleep taken by [`ShutdownToken::sleep`], which bounds how
/// late a loop notices a stop request.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Longest wait a deadline can express. Anything longer is clamped.
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// `now + after`, clamped to [`MAX_WAIT`] so the sum never overflows.
pub fn deadline_after(now: Instant, after: Duration) -> Instant {
    now + after.min(MAX_WAIT)
}

/// Token for cooperative shutdown of a service loop.
///
/// Uses an AtomicBool internally. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    requested: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `false` when the sleep was cut short by a shutdown request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = deadline_after(Instant::now(), duration);
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Route SIGINT/SIGTERM (Ctrl+C on Windows) into `token`.
pub fn install_signal_handlers(token: &ShutdownToken) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let handler_token = token.clone();
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, shutting down...", sig);
                handler_token.request();
            }
        });
    }

    #[cfg(windows)]
    {
        let handler_token = token.clone();
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, shutting down...");
            handler_token.request();
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_requested());
        token.request();
        assert!(clone.is_requested());
    }

    #[test]
    fn test_sleep_returns_early_on_request() {
        let token = ShutdownToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.request();
        });
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_deadline_after_clamps_huge_durations() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::MAX), now + MAX_WAIT);
        assert_eq!(deadline_after(now, Duration::from_secs(u64::MAX)), now + MAX_WAIT);
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_completes_without_request() {
        let token = ShutdownToken::new();
        assert!(token.sleep(Duration::from_millis(20)));
    }
}
