//! Suite orchestrator.
//!
//! Runs each service as `claimwatch <subcommand>` in its own process group,
//! multiplexes their output into one console stream, restarts whatever
//! exits, and on shutdown stops every group within one shared grace period.

use anyhow::{Context, Result};
use chrono::Local;
use claimwatch_process::{deadline_after, CommandSpec, GroupChild, ManagedChild, ShutdownToken, StdioMode};
use claimwatch_protocol::defaults::FATAL_STARTUP_EXIT_CODE;
use claimwatch_protocol::{SuiteConfig, WatchConfig};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Supervision tick
const TICK: Duration = Duration::from_millis(250);

struct ServiceDef {
    name: &'static str,
    subcommand: &'static str,
    summary: &'static str,
}

static SERVICES: [ServiceDef; 3] = [
    ServiceDef {
        name: "monitor",
        subcommand: "monitor",
        summary: "watches the mail host and runs the scanner while it is up",
    },
    ServiceDef {
        name: "dispatcher",
        subcommand: "dispatch",
        summary: "hands queued tickets to the worker",
    },
    ServiceDef {
        name: "keep-awake",
        subcommand: "keep-awake",
        summary: "keeps the machine and display awake",
    },
];

pub fn run(config: &WatchConfig, config_path: &Path, verbose: bool, shutdown: &ShutdownToken) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate the claimwatch executable")?;

    let mut services = Vec::new();
    for def in &SERVICES {
        if def.subcommand == "keep-awake" && !config.keep_awake.enabled {
            info!("Keep-awake disabled in configuration; not starting it");
            continue;
        }
        let spec = service_command(&exe, config_path, verbose, def)?;
        services.push(ManagedService::new(def, spec, &config.suite));
    }

    let (tx, rx) = mpsc::channel();
    spawn_printer(rx).context("Failed to start output multiplexer")?;
    print_legend(&services);

    let now = Instant::now();
    for service in &mut services {
        service.start(&tx, now);
    }
    while shutdown.sleep(TICK) {
        let now = Instant::now();
        for service in &mut services {
            service.poll(&tx, now);
        }
    }

    info!("Shutdown requested, stopping {} service(s)", services.len());
    stop_all(&mut services, config.suite.shutdown_grace());
    info!("Suite stopped");
    Ok(())
}

fn service_command(exe: &Path, config_path: &Path, verbose: bool, def: &ServiceDef) -> Result<CommandSpec> {
    let mut command = vec![
        exe.to_string_lossy().into_owned(),
        "--config".to_string(),
        config_path.to_string_lossy().into_owned(),
        def.subcommand.to_string(),
    ];
    if verbose {
        command.push("--verbose".to_string());
    }
    CommandSpec::resolve(def.name, &command, None).with_context(|| format!("Cannot build command for {}", def.name))
}

fn print_legend(services: &[ManagedService]) {
    println!("claimwatch suite: {} service(s)", services.len());
    for service in services {
        println!("  [{}] {}", service.def.name, service.def.summary);
    }
    println!("Press Ctrl+C to stop.");
    println!();
}

/// Restart delay for one service.
///
/// Doubles after every run shorter than `max`, capped at `max`; a run lasting
/// at least `max` starts over from `base`.
#[derive(Debug, Clone)]
struct RestartPolicy {
    base: Duration,
    max: Duration,
    next: Duration,
}

impl RestartPolicy {
    fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, next: base }
    }

    fn delay_after(&mut self, ran_for: Duration) -> Duration {
        if ran_for >= self.max {
            self.next = self.base;
        }
        let delay = self.next.min(self.max);
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }
}

struct ManagedService {
    def: &'static ServiceDef,
    spec: CommandSpec,
    child: Option<GroupChild>,
    started_at: Instant,
    restart: RestartPolicy,
    restart_at: Option<Instant>,
}

impl ManagedService {
    fn new(def: &'static ServiceDef, spec: CommandSpec, config: &SuiteConfig) -> Self {
        Self {
            def,
            spec,
            child: None,
            started_at: Instant::now(),
            restart: RestartPolicy::new(config.restart_delay(), config.max_restart_delay()),
            restart_at: None,
        }
    }

    fn start(&mut self, tx: &Sender<OutputLine>, now: Instant) {
        self.restart_at = None;
        match GroupChild::spawn(&self.spec, StdioMode::Piped) {
            Ok(mut child) => {
                if let Some(stdout) = child.take_stdout() {
                    spawn_pump(self.def.name, stdout, tx.clone());
                }
                if let Some(stderr) = child.take_stderr() {
                    spawn_pump(self.def.name, stderr, tx.clone());
                }
                info!("Started {} (pid={})", self.def.name, child.pid());
                self.child = Some(child);
                self.started_at = now;
            }
            Err(err) => {
                let delay = self.restart.delay_after(Duration::ZERO);
                error!("Failed to start {}: {}; retrying in {:?}", self.def.name, err, delay);
                self.restart_at = Some(deadline_after(now, delay));
            }
        }
    }

    fn poll(&mut self, tx: &Sender<OutputLine>, now: Instant) {
        if let Some(child) = self.child.as_mut() {
            let exit = match child.try_wait() {
                Ok(Some(exit)) => exit,
                Ok(None) => return,
                Err(err) => {
                    warn!("Failed to poll {} (pid={}): {}", self.def.name, child.pid(), err);
                    return;
                }
            };
            self.child = None;
            let delay = self.restart.delay_after(now.saturating_duration_since(self.started_at));
            if exit.code == Some(FATAL_STARTUP_EXIT_CODE) {
                error!(
                    "{} could not start (see its log); retrying in {:?}",
                    self.def.name, delay
                );
            } else {
                warn!("{} exited with {}; restarting in {:?}", self.def.name, exit, delay);
            }
            self.restart_at = Some(deadline_after(now, delay));
            return;
        }

        if self.restart_at.is_some_and(|at| now >= at) {
            self.start(tx, now);
        }
    }
}

/// Graceful stop to every group at once, then wait within one shared
/// deadline and kill whatever is left.
fn stop_all(services: &mut [ManagedService], grace: Duration) {
    let deadline = deadline_after(Instant::now(), grace);
    for service in services.iter_mut() {
        if let Some(child) = service.child.as_mut() {
            if let Err(err) = child.terminate() {
                warn!("Failed to signal {}: {}", service.def.name, err);
            }
        }
    }
    for service in services.iter_mut() {
        let Some(mut child) = service.child.take() else {
            continue;
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        match child.stop(remaining) {
            Ok(outcome) if outcome.was_forced() => {
                warn!("{} did not stop within {:?}; killed", service.def.name, grace)
            }
            Ok(outcome) => info!("{} stopped ({})", service.def.name, outcome.exit()),
            Err(err) => error!("Failed to stop {}: {}", service.def.name, err),
        }
    }
}

struct OutputLine {
    service: &'static str,
    line: String,
}

/// Formats multiplexed output, collapsing blank-line runs per service.
#[derive(Default)]
struct LineFormatter {
    last_blank: HashMap<&'static str, bool>,
}

impl LineFormatter {
    fn format(&mut self, service: &'static str, line: &str, timestamp: &str) -> Option<String> {
        let line = line.trim_end();
        let blank = line.trim().is_empty();
        let previous_blank = self.last_blank.insert(service, blank).unwrap_or(false);
        if blank && previous_blank {
            return None;
        }
        Some(format!("[{}] [{}] {}", timestamp, service, line).trim_end().to_string())
    }
}

fn spawn_printer(rx: Receiver<OutputLine>) -> io::Result<()> {
    thread::Builder::new().name("suite-output".to_string()).spawn(move || {
        let mut formatter = LineFormatter::default();
        let stdout = io::stdout();
        for OutputLine { service, line } in rx {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            if let Some(formatted) = formatter.format(service, &line, &timestamp) {
                let mut out = stdout.lock();
                let _ = writeln!(out, "{}", formatted);
                let _ = out.flush();
            }
        }
    })?;
    Ok(())
}

fn spawn_pump<R: Read + Send + 'static>(service: &'static str, reader: R, tx: Sender<OutputLine>) {
    let spawned = thread::Builder::new()
        .name(format!("{}-output", service))
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        if tx.send(OutputLine { service, line }).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    if let Err(err) = spawned {
        error!("Failed to capture output of {}: {}", service, err);
    }
}
