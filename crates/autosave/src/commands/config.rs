//! Configuration display.

use autosave_core::Config;
use std::path::PathBuf;

/// Print where the configuration came from and its effective values.
pub fn show_config(config: &Config, sources: &[PathBuf]) -> anyhow::Result<()> {
    println!("Configuration sources:");
    if sources.is_empty() {
        println!("  (none)");
    } else {
        for source in sources {
            println!("  {}", source.display());
        }
    }
    println!();

    println!("Archive: {}", config.archive_dir()?.display());
    println!("Retention: {}", config.retention());
    println!("Poll interval: {}s", config.poll_interval().as_secs());
    println!();

    println!("Current configuration:");
    println!("{}", serde_json::to_string_pretty(config)?);

    Ok(())
}
