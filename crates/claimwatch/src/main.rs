//! claimwatch: background watcher suite
//!
//! - `monitor`: watches the mail host and supervises the scanner while it runs
//! - `dispatch`: drains the ticket queue, one worker per ticket
//! - `keep-awake`: holds the machine awake
//! - `suite`: runs all of the above as child processes with one console

use anyhow::{Context, Result};
use claimwatch_logging::{init_logging, LogConfig};
use claimwatch_process::{install_signal_handlers, LaunchError, ShutdownToken};
use claimwatch_protocol::defaults::FATAL_STARTUP_EXIT_CODE;
use claimwatch_protocol::{paths, ConfigError, WatchConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

mod cli;
mod services;
mod suite;

#[derive(Parser, Debug)]
#[command(name = "claimwatch", version, about = "Background watcher suite for mail-driven claim processing")]
struct Cli {
    /// Configuration file (default: ~/.claimwatch/config.toml)
    #[arg(short = 'c', long, global = true, env = "CLAIMWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every service under one supervisor with a shared console
    Suite,

    /// Watch the mail host and supervise the scanner
    Monitor,

    /// Dispatch queued tickets to the worker
    Dispatch,

    /// Keep the machine and display awake
    KeepAwake,

    /// Write a ticket into the queue
    Enqueue {
        /// Ticket kind ([a-z0-9-]+)
        #[arg(short, long)]
        kind: String,

        /// Work-item identifier passed to the worker
        #[arg(long)]
        id: String,

        /// Extra metadata as key=value (repeatable)
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Show queue counts and resolved paths
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Log file stem for this command.
    fn service_name(&self) -> &'static str {
        match self {
            Commands::Suite => "suite",
            Commands::Monitor => "monitor",
            Commands::Dispatch => "dispatcher",
            Commands::KeepAwake => "keep-awake",
            Commands::Enqueue { .. } | Commands::Status { .. } | Commands::Config { .. } => "claimwatch",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        service: cli.command.service_name(),
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_fatal_startup(&err) => {
            error!("Fatal startup error: {:#}", err);
            ExitCode::from(FATAL_STARTUP_EXIT_CODE as u8)
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(paths::default_config_path);
    let config = WatchConfig::load_or_default(&config_path)?;

    match cli.command {
        Commands::Suite => {
            let shutdown = shutdown_on_signal()?;
            suite::run(&config, &config_path, cli.verbose, &shutdown)
        }
        Commands::Monitor => {
            let shutdown = shutdown_on_signal()?;
            services::monitor(&config, &shutdown)
        }
        Commands::Dispatch => {
            let shutdown = shutdown_on_signal()?;
            services::dispatch(&config, &shutdown)
        }
        Commands::KeepAwake => {
            let shutdown = shutdown_on_signal()?;
            services::keep_awake(&config, &shutdown)
        }
        Commands::Enqueue { kind, id, meta } => cli::enqueue::run(&config, &kind, &id, &meta),
        Commands::Status { json } => cli::status::run(&config, &config_path, json),
        Commands::Config { json } => cli::config::run(&config, &config_path, json),
    }
}

fn shutdown_on_signal() -> Result<ShutdownToken> {
    let shutdown = ShutdownToken::new();
    install_signal_handlers(&shutdown).context("Failed to install signal handlers")?;
    Ok(shutdown)
}

/// Startup problems a restart cannot fix: missing executables, bad config.
fn is_fatal_startup(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<LaunchError>().is_some_and(LaunchError::is_fatal)
            || cause.downcast_ref::<ConfigError>().is_some()
    })
}
