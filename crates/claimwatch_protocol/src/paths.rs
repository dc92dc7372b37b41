use std::path::PathBuf;

/// Resolve the claimwatch home directory.
///
/// Priority:
/// 1) CLAIMWATCH_HOME
/// 2) ~/.claimwatch
/// 3) ./.claimwatch
pub fn claimwatch_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("CLAIMWATCH_HOME") {
        return PathBuf::from(override_path);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".claimwatch");
    }
    PathBuf::from(".").join(".claimwatch")
}

/// Default config file: ~/.claimwatch/config.toml
pub fn default_config_path() -> PathBuf {
    claimwatch_home().join("config.toml")
}

/// Default logs directory: ~/.claimwatch/logs
pub fn default_logs_dir() -> PathBuf {
    claimwatch_home().join("logs")
}

/// Default ticket queue directory: ~/.claimwatch/queue
pub fn default_queue_dir() -> PathBuf {
    claimwatch_home().join("queue")
}
