//! Queue status.

use anyhow::{Context, Result};
use claimwatch_dispatcher::TicketQueue;
use claimwatch_protocol::{paths, WatchConfig};
use std::path::Path;

/// Number of upcoming tickets listed in text output
const NEXT_TICKETS_SHOWN: usize = 5;

pub fn run(config: &WatchConfig, config_path: &Path, json: bool) -> Result<()> {
    let queue = TicketQueue::new(config.queue_dir());
    let counts = queue.counts().context("Failed to read queue directory")?;
    let pending = queue.pending().context("Failed to list pending tickets")?;

    if json {
        let next: Vec<&str> = pending.iter().map(|name| name.file_name()).collect();
        let output = serde_json::json!({
            "config_file": config_path.to_string_lossy(),
            "logs_dir": paths::default_logs_dir().to_string_lossy(),
            "queue_dir": queue.dir().to_string_lossy(),
            "counts": counts,
            "pending": next,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Queue:        {}", queue.dir().display());
    println!("  pending:     {}", counts.pending);
    println!("  quarantined: {}", counts.quarantined);
    println!("  failed:      {}", counts.failed);
    if !pending.is_empty() {
        println!();
        println!("Next tickets:");
        for name in pending.iter().take(NEXT_TICKETS_SHOWN) {
            println!("  {}  {}", name.created_at().format("%Y-%m-%d %H:%M:%S"), name.file_name());
        }
        if pending.len() > NEXT_TICKETS_SHOWN {
            println!("  ... and {} more", pending.len() - NEXT_TICKETS_SHOWN);
        }
    }
    println!();
    println!("Config:       {}", config_path.display());
    println!("Logs:         {}", paths::default_logs_dir().display());
    Ok(())
}
