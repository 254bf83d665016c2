//! Snapshot storage implementation.

use crate::snapshot::{parse_archive_name, snapshot_file_name};
use crate::{Snapshot, SnapshotError, SnapshotResult};
use chrono::{DateTime, Duration, Local, NaiveDateTime};
use similar::{ChangeTag, TextDiff};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Number of snapshots kept per (application, file) when nothing else is configured.
pub const DEFAULT_RETENTION: usize = 5;

/// Upper bound on how far a capture moves forward looking for a free slot.
const MAX_SLOT_PROBES: i64 = 3600;

/// Storage for archived file copies.
///
/// There is no index file; the directory listing is the source of truth:
/// ```text
/// root/
///   <app_name>/
///     <stem>_<YYYYMMDD_HHMMSS><ext>
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open the archive rooted at `root`, creating it if needed.
    ///
    /// Failure here is fatal for the service: no snapshot could ever succeed.
    pub async fn new(root: PathBuf) -> SnapshotResult<Self> {
        fs::create_dir_all(&root)
            .await
            .map_err(|source| SnapshotError::ArchiveRootUnavailable {
                path: root.clone(),
                source,
            })?;

        debug!(root = %root.display(), "Snapshot archive ready");
        Ok(Self { root })
    }

    /// Root directory of the archive.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the snapshots of one application.
    pub fn namespace_dir(&self, app_name: &str) -> SnapshotResult<PathBuf> {
        validate_component(app_name)?;
        Ok(self.root.join(app_name))
    }

    /// Archive the current content of `source` under `app_name`.
    pub async fn capture(&self, source: &Path, app_name: &str) -> SnapshotResult<Snapshot> {
        self.capture_at(source, app_name, Local::now().naive_local())
            .await
    }

    /// Archive `source` as if captured at `captured_at`.
    ///
    /// Stamps of one file only move forward: a capture at or before the
    /// newest existing snapshot lands one second after it. When the slot for
    /// that second is already taken the capture moves to the next free
    /// second, so names stay unique and ordered.
    pub async fn capture_at(
        &self,
        source: &Path,
        app_name: &str,
        captured_at: NaiveDateTime,
    ) -> SnapshotResult<Snapshot> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SnapshotError::InvalidName(source.display().to_string()))?
            .to_string();
        let dir = self.namespace_dir(app_name)?;

        let metadata = fs::metadata(source)
            .await
            .map_err(|e| SnapshotError::source_unavailable(source, e))?;
        if !metadata.is_file() {
            return Err(SnapshotError::source_unavailable(
                source,
                std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let content = fs::read(source)
            .await
            .map_err(|e| SnapshotError::source_unavailable(source, e))?;

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SnapshotError::destination_unwritable(&dir, e))?;

        let start = match self.list_snapshots(app_name, &file_name).await?.first() {
            Some(newest) if newest.captured_at >= captured_at => {
                debug!(
                    app = app_name,
                    file = %file_name,
                    clock = %captured_at,
                    newest = %newest.captured_at,
                    "Clock is behind the newest snapshot, stamping after it"
                );
                newest.captured_at + Duration::seconds(1)
            }
            _ => captured_at,
        };

        let (storage_path, captured_at, mut file) = claim_slot(&dir, &file_name, start).await?;

        let written = async {
            file.write_all(&content).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&storage_path).await {
                warn!(
                    path = %storage_path.display(),
                    "Failed to remove partial snapshot: {}", cleanup
                );
            }
            return Err(SnapshotError::destination_unwritable(&storage_path, e));
        }

        info!(
            app = app_name,
            source = %source.display(),
            snapshot = %storage_path.display(),
            "Captured snapshot"
        );

        Ok(Snapshot {
            app_name: app_name.to_string(),
            file_name,
            source_path: Some(source.to_path_buf()),
            captured_at,
            storage_path,
        })
    }

    /// List the snapshots of one file, newest first.
    ///
    /// Returns an empty list when the application has no archive yet.
    pub async fn list_snapshots(
        &self,
        app_name: &str,
        file_name: &str,
    ) -> SnapshotResult<Vec<Snapshot>> {
        let dir = self.namespace_dir(app_name)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::source_unavailable(&dir, e)),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SnapshotError::source_unavailable(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((original, stamp)) = parse_archive_name(&name) else {
                continue;
            };
            if original != file_name {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), "Skipping unreadable snapshot: {}", e);
                    continue;
                }
            };

            let captured_at = match stamp {
                Some(stamp) => stamp,
                None => match metadata.modified() {
                    Ok(mtime) => DateTime::<Local>::from(mtime).naive_local(),
                    Err(e) => {
                        warn!(path = %entry.path().display(), "No usable capture time: {}", e);
                        continue;
                    }
                },
            };

            snapshots.push(Snapshot {
                app_name: app_name.to_string(),
                file_name: original,
                source_path: None,
                captured_at,
                storage_path: entry.path(),
            });
        }

        // Newest first; equal times fall back to the name so the order is stable
        snapshots.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then_with(|| b.archive_name().cmp(&a.archive_name()))
        });

        debug!(
            app = app_name,
            file = file_name,
            count = snapshots.len(),
            "Listed snapshots"
        );
        Ok(snapshots)
    }

    /// Delete all but the `retention` newest snapshots of one file.
    ///
    /// A failed deletion is logged and the remaining ones still run.
    /// Returns the number of snapshots deleted.
    pub async fn prune(
        &self,
        app_name: &str,
        file_name: &str,
        retention: usize,
    ) -> SnapshotResult<usize> {
        self.prune_with(app_name, file_name, retention, fs::remove_file)
            .await
    }

    async fn prune_with<F, Fut>(
        &self,
        app_name: &str,
        file_name: &str,
        retention: usize,
        remove: F,
    ) -> SnapshotResult<usize>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        let snapshots = self.list_snapshots(app_name, file_name).await?;
        let mut deleted = 0;

        for snapshot in snapshots.iter().skip(retention) {
            match remove(snapshot.storage_path.clone()).await {
                Ok(()) => {
                    debug!(path = %snapshot.storage_path.display(), "Deleted old snapshot");
                    deleted += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %snapshot.storage_path.display(),
                    "Failed to delete old snapshot: {}",
                    e
                ),
            }
        }

        if deleted > 0 {
            info!(app = app_name, file = file_name, deleted, "Pruned snapshots");
        }
        Ok(deleted)
    }

    /// Copy a snapshot back to `destination`, replacing whatever is there.
    ///
    /// The archived copy itself is never modified.
    pub async fn restore(&self, snapshot: &Snapshot, destination: &Path) -> SnapshotResult<()> {
        let content = fs::read(&snapshot.storage_path)
            .await
            .map_err(|e| SnapshotError::source_unavailable(&snapshot.storage_path, e))?;

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SnapshotError::destination_unwritable(parent, e))?;
        }

        fs::write(destination, content)
            .await
            .map_err(|e| SnapshotError::destination_unwritable(destination, e))?;

        info!(
            snapshot = %snapshot.storage_path.display(),
            destination = %destination.display(),
            "Restored snapshot"
        );
        Ok(())
    }

    /// Names of every application that has an archive namespace.
    pub async fn applications(&self) -> SnapshotResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| SnapshotError::source_unavailable(&self.root, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SnapshotError::source_unavailable(&self.root, e))?
        {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Look up a stored snapshot by its archive name.
    pub async fn find(&self, app_name: &str, archive_name: &str) -> SnapshotResult<Snapshot> {
        validate_component(archive_name)?;
        let (file_name, stamp) = parse_archive_name(archive_name)
            .ok_or_else(|| SnapshotError::InvalidName(archive_name.to_string()))?;

        let storage_path = self.namespace_dir(app_name)?.join(archive_name);
        let metadata = match fs::metadata(&storage_path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(SnapshotError::not_found(format!("{app_name}/{archive_name}"))),
        };

        let captured_at = match stamp {
            Some(stamp) => stamp,
            None => metadata
                .modified()
                .map(|mtime| DateTime::<Local>::from(mtime).naive_local())
                .map_err(|e| SnapshotError::source_unavailable(&storage_path, e))?,
        };

        Ok(Snapshot {
            app_name: app_name.to_string(),
            file_name,
            source_path: None,
            captured_at,
            storage_path,
        })
    }

    /// Unified diff from a snapshot to the current content of `current`.
    ///
    /// Empty when nothing changed.
    pub async fn diff(&self, snapshot: &Snapshot, current: &Path) -> SnapshotResult<String> {
        let old_content = fs::read(&snapshot.storage_path)
            .await
            .map_err(|e| SnapshotError::source_unavailable(&snapshot.storage_path, e))?;
        let new_content = match fs::read(current).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(SnapshotError::source_unavailable(current, e)),
        };

        Ok(generate_diff(
            &String::from_utf8_lossy(&old_content),
            &String::from_utf8_lossy(&new_content),
            &snapshot.archive_name(),
            &current.display().to_string(),
        ))
    }
}

/// Reject names that would escape the archive directory.
fn validate_component(name: &str) -> SnapshotResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(SnapshotError::InvalidName(name.to_string())),
    }
}

/// Create the archive file for the first free second at or after `captured_at`.
async fn claim_slot(
    dir: &Path,
    file_name: &str,
    captured_at: NaiveDateTime,
) -> SnapshotResult<(PathBuf, NaiveDateTime, fs::File)> {
    for offset in 0..MAX_SLOT_PROBES {
        let at = captured_at + Duration::seconds(offset);
        let path = dir.join(snapshot_file_name(file_name, at));

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => {
                if offset > 0 {
                    debug!(path = %path.display(), offset, "Snapshot slot moved forward");
                }
                return Ok((path, at, file));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(SnapshotError::destination_unwritable(path, e)),
        }
    }

    Err(SnapshotError::destination_unwritable(
        dir,
        std::io::Error::new(ErrorKind::AlreadyExists, "no free snapshot slot"),
    ))
}

/// Generate a unified diff between two strings.
fn generate_diff(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let groups = diff.grouped_ops(3);
    let mut output = String::new();
    if groups.is_empty() {
        return output;
    }

    output.push_str(&format!("--- {old_label}\n"));
    output.push_str(&format!("+++ {new_label}\n"));

    for (idx, group) in groups.iter().enumerate() {
        if idx > 0 {
            output.push_str("...\n");
        }

        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };

                output.push_str(sign);
                output.push_str(change.value());
                if !change.value().ends_with('\n') {
                    output.push('\n');
                }
            }
        }
    }

    output
}
