//! Resolved configuration and paths.

use anyhow::{Context, Result};
use claimwatch_protocol::{paths, WatchConfig};
use std::path::Path;

pub fn run(config: &WatchConfig, config_path: &Path, json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "config_file": {
                "path": config_path.to_string_lossy(),
                "exists": config_path.exists(),
            },
            "home": paths::claimwatch_home().to_string_lossy(),
            "logs_dir": paths::default_logs_dir().to_string_lossy(),
            "queue_dir": config.queue_dir().to_string_lossy(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("CLAIMWATCH CONFIGURATION");
    println!("========================");
    println!();
    println!(
        "Config:   {} ({})",
        config_path.display(),
        if config_path.exists() { "loaded" } else { "not found, using defaults" }
    );
    println!("Home:     {}", paths::claimwatch_home().display());
    println!("Logs:     {}", paths::default_logs_dir().display());
    println!("Queue:    {}", config.queue_dir().display());
    println!();
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
