//! Configuration file shared by every claimwatch service.
//!
//! A single TOML file drives all services; each service reads the sections
//! it needs. A missing file yields the defaults from [`crate::defaults`].

use crate::defaults::*;
use crate::error::ConfigError;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub host: HostConfig,
    pub scanner: ScannerConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub keep_awake: KeepAwakeConfig,
    pub suite: SuiteConfig,
}

/// Mail host detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Process image name of the mail host (compared case-insensitively)
    pub process_name: String,
    pub poll_interval_ms: u64,
    /// Bounded wait on the OS event channel per loop iteration
    pub event_wait_ms: u64,
}

/// Scanning subprocess supervised while the host is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Program followed by its arguments
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub restart_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// A run lasting at least this long resets the crash counter
    pub stable_after_secs: u64,
    pub crash_loop_threshold: u32,
    pub stop_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue directory; defaults to ~/.claimwatch/queue
    pub dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
}

/// What happens to a ticket whose worker failed or timed out.
///
/// Tickets are deleted before the worker starts, so neither policy ever
/// re-runs a ticket automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log the failure and discard the ticket.
    #[default]
    Drop,
    /// Write the ticket and the failure reason to the `failed/` directory.
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub stop_grace_secs: u64,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAwakeConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub restart_delay_secs: u64,
    pub max_restart_delay_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            process_name: DEFAULT_HOST_PROCESS_NAME.to_string(),
            poll_interval_ms: DEFAULT_HOST_POLL_INTERVAL_MS,
            event_wait_ms: DEFAULT_EVENT_WAIT_MS,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            working_dir: None,
            restart_backoff_secs: DEFAULT_RESTART_BACKOFF_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            stable_after_secs: DEFAULT_STABLE_AFTER_SECS,
            crash_loop_threshold: DEFAULT_CRASH_LOOP_THRESHOLD,
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: None,
            poll_interval_ms: DEFAULT_QUEUE_POLL_INTERVAL_MS,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            working_dir: None,
            timeout_secs: DEFAULT_WORKER_TIMEOUT_SECS,
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
            failure_policy: FailurePolicy::Drop,
        }
    }
}

impl Default for KeepAwakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_KEEP_AWAKE_INTERVAL_SECS,
        }
    }
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            restart_delay_secs: DEFAULT_SUITE_RESTART_DELAY_SECS,
            max_restart_delay_secs: DEFAULT_SUITE_MAX_RESTART_DELAY_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: WatchConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values that would turn a control loop into a busy spin, or
    /// durations too long to schedule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("host.poll_interval_ms", self.host.poll_interval_ms),
            ("host.event_wait_ms", self.host.event_wait_ms),
            ("scanner.restart_backoff_secs", self.scanner.restart_backoff_secs),
            ("queue.poll_interval_ms", self.queue.poll_interval_ms),
            ("worker.timeout_secs", self.worker.timeout_secs),
            ("keep_awake.interval_secs", self.keep_awake.interval_secs),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", field)));
            }
        }
        for (field, duration) in self.durations() {
            if duration > Duration::from_secs(MAX_CONFIG_DURATION_SECS) {
                return Err(ConfigError::Invalid(format!(
                    "{} must not exceed {} days",
                    field,
                    MAX_CONFIG_DURATION_SECS / 86_400
                )));
            }
        }
        if self.scanner.max_backoff_secs < self.scanner.restart_backoff_secs {
            return Err(ConfigError::Invalid(
                "scanner.max_backoff_secs must not be below scanner.restart_backoff_secs".to_string(),
            ));
        }
        if self.scanner.crash_loop_threshold == 0 {
            return Err(ConfigError::Invalid(
                "scanner.crash_loop_threshold must be at least 1".to_string(),
            ));
        }
        if self.host.process_name.trim().is_empty() {
            return Err(ConfigError::Invalid("host.process_name is empty".to_string()));
        }
        Ok(())
    }

    fn durations(&self) -> [(&'static str, Duration); 13] {
        [
            ("host.poll_interval_ms", self.host.poll_interval()),
            ("host.event_wait_ms", self.host.event_wait()),
            ("scanner.restart_backoff_secs", self.scanner.restart_backoff()),
            ("scanner.max_backoff_secs", self.scanner.max_backoff()),
            ("scanner.stable_after_secs", self.scanner.stable_after()),
            ("scanner.stop_grace_secs", self.scanner.stop_grace()),
            ("queue.poll_interval_ms", self.queue.poll_interval()),
            ("worker.timeout_secs", self.worker.timeout()),
            ("worker.stop_grace_secs", self.worker.stop_grace()),
            ("keep_awake.interval_secs", self.keep_awake.interval()),
            ("suite.restart_delay_secs", self.suite.restart_delay()),
            ("suite.max_restart_delay_secs", self.suite.max_restart_delay()),
            ("suite.shutdown_grace_secs", self.suite.shutdown_grace()),
        ]
    }

    /// Resolved queue directory.
    pub fn queue_dir(&self) -> PathBuf {
        self.queue
            .dir
            .clone()
            .unwrap_or_else(paths::default_queue_dir)
    }
}

impl HostConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn event_wait(&self) -> Duration {
        Duration::from_millis(self.event_wait_ms)
    }
}

impl ScannerConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl KeepAwakeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl SuiteConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn max_restart_delay(&self) -> Duration {
        Duration::from_secs(self.max_restart_delay_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert_eq!(config.host.process_name, "OUTLOOK.EXE");
        assert_eq!(config.host.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.scanner.restart_backoff(), Duration::from_secs(10));
        assert_eq!(config.worker.timeout(), Duration::from_secs(300));
        assert_eq!(config.keep_awake.interval(), Duration::from_secs(30));
        assert_eq!(config.worker.failure_policy, FailurePolicy::Drop);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
            [host]
            process_name = "thunderbird"

            [scanner]
            command = ["python", "scanner.py"]

            [worker]
            failure_policy = "dead-letter"
        "#;
        let config: WatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host.process_name, "thunderbird");
        assert_eq!(config.host.poll_interval_ms, DEFAULT_HOST_POLL_INTERVAL_MS);
        assert_eq!(config.scanner.command, vec!["python", "scanner.py"]);
        assert_eq!(config.scanner.stop_grace_secs, DEFAULT_STOP_GRACE_SECS);
        assert_eq!(config.worker.failure_policy, FailurePolicy::DeadLetter);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = WatchConfig::default();
        config.queue.poll_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue.poll_interval_ms"));
    }

    #[test]
    fn test_zero_event_wait_rejected() {
        let mut config = WatchConfig::default();
        config.host.event_wait_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("host.event_wait_ms"));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let setters: [(&str, fn(&mut WatchConfig)); 13] = [
            ("host.poll_interval_ms", |c| c.host.poll_interval_ms = u64::MAX),
            ("host.event_wait_ms", |c| c.host.event_wait_ms = u64::MAX),
            ("scanner.restart_backoff_secs", |c| {
                c.scanner.restart_backoff_secs = u64::MAX;
                c.scanner.max_backoff_secs = u64::MAX;
            }),
            ("scanner.max_backoff_secs", |c| c.scanner.max_backoff_secs = u64::MAX),
            ("scanner.stable_after_secs", |c| c.scanner.stable_after_secs = u64::MAX),
            ("scanner.stop_grace_secs", |c| c.scanner.stop_grace_secs = u64::MAX),
            ("queue.poll_interval_ms", |c| c.queue.poll_interval_ms = u64::MAX),
            ("worker.timeout_secs", |c| c.worker.timeout_secs = u64::MAX),
            ("worker.stop_grace_secs", |c| c.worker.stop_grace_secs = u64::MAX),
            ("keep_awake.interval_secs", |c| c.keep_awake.interval_secs = u64::MAX),
            ("suite.restart_delay_secs", |c| c.suite.restart_delay_secs = u64::MAX),
            ("suite.max_restart_delay_secs", |c| c.suite.max_restart_delay_secs = u64::MAX),
            ("suite.shutdown_grace_secs", |c| c.suite.shutdown_grace_secs = u64::MAX),
        ];
        for (field, set) in setters {
            let mut config = WatchConfig::default();
            set(&mut config);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{}: {}", field, err);
        }
    }

    #[test]
    fn test_longest_allowed_duration_accepted() {
        let mut config = WatchConfig::default();
        config.worker.timeout_secs = MAX_CONFIG_DURATION_SECS;
        config.validate().unwrap();
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WatchConfig::load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.suite.shutdown_grace_secs, DEFAULT_SHUTDOWN_GRACE_SECS);
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[host\nprocess_name = 1").unwrap();
        let err = WatchConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
