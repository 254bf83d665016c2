//! Archive maintenance command handlers.
//!
//! Handles listing, restoring, pruning and diffing snapshots.

use anyhow::{bail, Context};
use autosave_core::Config;
use autosave_snapshot::SnapshotStore;
use std::path::{Path, PathBuf};

async fn open_store(config: &Config) -> anyhow::Result<SnapshotStore> {
    let archive_dir = config.archive_dir()?;
    SnapshotStore::new(archive_dir.clone())
        .await
        .with_context(|| format!("Cannot use archive at {}", archive_dir.display()))
}

/// Print the snapshots of one file, newest first.
pub async fn list_snapshots(config: &Config, app: &str, file: &str) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let snapshots = store.list_snapshots(app, file).await?;

    if snapshots.is_empty() {
        println!("No snapshots of {file} for {app}.");
        return Ok(());
    }

    println!("{:<48} {:<20}", "SNAPSHOT", "CAPTURED");
    println!("{}", "-".repeat(68));
    for snapshot in snapshots {
        println!(
            "{:<48} {:<20}",
            snapshot.archive_name(),
            snapshot.captured_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Restore a snapshot to `to`, or to its original name in the current directory.
pub async fn restore_snapshot(
    config: &Config,
    app: &str,
    snapshot: &str,
    to: Option<PathBuf>,
) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let found = store.find(app, snapshot).await?;

    let destination = match to {
        Some(path) => path,
        None => std::env::current_dir()?.join(&found.file_name),
    };
    store.restore(&found, &destination).await?;

    println!("Restored {} to {}", snapshot, destination.display());
    Ok(())
}

/// Delete all but the newest snapshots of one file.
pub async fn prune_snapshots(
    config: &Config,
    app: &str,
    file: &str,
    keep: Option<usize>,
) -> anyhow::Result<()> {
    let keep = keep.unwrap_or_else(|| config.retention());
    if keep == 0 {
        bail!("--keep must be at least 1");
    }

    let store = open_store(config).await?;
    let removed = store.prune(app, file, keep).await?;
    println!("Removed {removed} snapshot(s) of {file}, kept at most {keep}.");
    Ok(())
}

/// Print a unified diff from a snapshot to the current file.
pub async fn diff_snapshot(
    config: &Config,
    app: &str,
    snapshot: &str,
    file: &Path,
) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let found = store.find(app, snapshot).await?;
    let diff = store.diff(&found, file).await?;

    if diff.is_empty() {
        println!("No changes since {snapshot}.");
    } else {
        print!("{diff}");
    }
    Ok(())
}

/// Print the applications that have an archive namespace.
pub async fn list_applications(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let apps = store.applications().await?;

    if apps.is_empty() {
        println!("No archived applications.");
    } else {
        for app in apps {
            println!("{app}");
        }
    }
    Ok(())
}
