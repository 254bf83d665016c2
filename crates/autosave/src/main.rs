//! Autosave - force-saves open documents and keeps rolling snapshots.
//!
//! This is the main entry point for the autosave CLI.

mod commands;

use anyhow::Context;
use autosave_core::Config;
use autosave_util::{LogConfig, LogLevel};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "autosave")]
#[command(
    author,
    version,
    about = "Force-saves open documents and keeps rolling snapshots",
    long_about = None
)]
struct Cli {
    /// Config file, merged over the global one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot archive directory
    #[arg(long, global = true)]
    archive_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand (defaults to `run`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the configured applications until interrupted
    Run,
    /// List the snapshots of a file, newest first
    List {
        /// Application name
        app: String,
        /// Base name of the file (e.g. notes.txt)
        file: String,
    },
    /// Copy a snapshot back out of the archive
    Restore {
        /// Application name
        app: String,
        /// Archive name of the snapshot
        snapshot: String,
        /// Destination (defaults to the original name in the current directory)
        #[arg(long)]
        to: Option<PathBuf>,
    },
    /// Delete all but the newest snapshots of a file
    Prune {
        /// Application name
        app: String,
        /// Base name of the file
        file: String,
        /// Snapshots to keep (defaults to the configured retention)
        #[arg(short, long)]
        keep: Option<usize>,
    },
    /// Show what changed since a snapshot
    Diff {
        /// Application name
        app: String,
        /// Archive name of the snapshot
        snapshot: String,
        /// Current version of the file
        file: PathBuf,
    },
    /// List applications with archived snapshots
    Apps,
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = Config::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    if let Some(dir) = cli.archive_dir {
        config.archive_dir = Some(dir);
    }

    init_logging(&config, cli.verbose);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run_service(&config).await,
        Commands::List { app, file } => commands::list_snapshots(&config, &app, &file).await,
        Commands::Restore { app, snapshot, to } => {
            commands::restore_snapshot(&config, &app, &snapshot, to).await
        }
        Commands::Prune { app, file, keep } => {
            commands::prune_snapshots(&config, &app, &file, keep).await
        }
        Commands::Diff {
            app,
            snapshot,
            file,
        } => commands::diff_snapshot(&config, &app, &snapshot, &file).await,
        Commands::Apps => commands::list_applications(&config).await,
        Commands::Config => commands::show_config(&config, &sources),
    }
}

/// Initialize logging to stderr. `RUST_LOG` overrides the level.
fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose {
        LogLevel::Debug
    } else {
        config.log_level().unwrap_or_default()
    };

    autosave_util::log::init(LogConfig {
        level,
        ..Default::default()
    });
}
