use anyhow::{anyhow, Context, Result};
use claimwatch_protocol::{Ticket, WatchConfig};
use tracing::info;

pub fn run(config: &WatchConfig, kind: &str, id: &str, meta: &[String]) -> Result<()> {
    let ticket = build_ticket(kind, id, meta)?;
    let queue_dir = config.queue_dir();
    let path = ticket
        .write_to_queue(&queue_dir)
        .with_context(|| format!("Failed to enqueue ticket into {}", queue_dir.display()))?;
    info!("Enqueued ticket {} ({})", ticket.id, kind);
    println!("{}", path.display());
    Ok(())
}

fn build_ticket(kind: &str, id: &str, meta: &[String]) -> Result<Ticket> {
    let mut ticket = Ticket::new(kind, id);
    for entry in meta {
        let (key, value) = entry
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("Invalid metadata '{}': expected KEY=VALUE", entry))?;
        ticket = ticket.with_metadata(key.trim(), value);
    }
    Ok(ticket)
}
