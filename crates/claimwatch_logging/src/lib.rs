//! Shared logging utilities for claimwatch services.
//!
//! Each service owns one append-only log file (`<logs>/<service>.log`).
//! Files are never truncated or rotated here; rotation is left to the
//! operator's tooling. Console output goes to stderr so the suite
//! orchestrator can multiplex it.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "claimwatch=info,claimwatch_monitor=info,claimwatch_dispatcher=info,claimwatch_keepawake=info,claimwatch_process=info";
const VERBOSE_LOG_FILTER: &str = "claimwatch=debug,claimwatch_monitor=debug,claimwatch_dispatcher=debug,claimwatch_keepawake=debug,claimwatch_process=debug";

/// Logging configuration shared by claimwatch services.
pub struct LogConfig<'a> {
    /// Service name; becomes the log file stem
    pub service: &'a str,
    pub verbose: bool,
    /// Overrides the default `~/.claimwatch/logs`
    pub log_dir: Option<PathBuf>,
}

/// Initialize tracing with an append-only file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<PathBuf> {
    let log_dir = config
        .log_dir
        .unwrap_or_else(claimwatch_protocol::paths::default_logs_dir);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;

    let file_writer = SharedAppendWriter::open(&log_dir, config.service)
        .context("Failed to initialize service log writer")?;
    let log_path = file_writer.path.clone();

    let filter = || {
        if config.verbose {
            EnvFilter::new(VERBOSE_LOG_FILTER)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_target(false)
                .with_filter(filter()),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(log_path)
}

/// Path of the log file for `service` inside `log_dir`.
pub fn service_log_path(log_dir: &Path, service: &str) -> PathBuf {
    log_dir.join(format!("{}.log", sanitize_name(service)))
}

#[derive(Clone)]
struct SharedAppendWriter {
    path: PathBuf,
    inner: Arc<Mutex<File>>,
}

impl SharedAppendWriter {
    fn open(dir: &Path, service: &str) -> io::Result<Self> {
        let path = service_log_path(dir, service);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct SharedAppendWriterGuard {
    inner: Arc<Mutex<File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedAppendWriter {
    type Writer = SharedAppendWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedAppendWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedAppendWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
