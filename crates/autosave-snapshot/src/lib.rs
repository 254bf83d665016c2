//! Snapshot archive for autosave.
//!
//! Every successful forced save is archived as a timestamped copy:
//! - Copies are namespaced per monitored application
//! - Names embed the capture time with second resolution
//! - Only the newest N copies per (application, file) are retained
//! - Restoring never touches the archived copy
//!
//! # Example
//!
//! ```no_run
//! use autosave_snapshot::SnapshotStore;
//! use std::path::{Path, PathBuf};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SnapshotStore::new(PathBuf::from("/var/lib/autosave/archive")).await?;
//!
//! let snapshot = store.capture(Path::new("/docs/a.txt"), "Editor").await?;
//! store.prune("Editor", "a.txt", 5).await?;
//!
//! // ... later ...
//! store.restore(&snapshot, Path::new("/docs/a.txt")).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod snapshot;
mod store;

pub use error::{SnapshotError, SnapshotResult};
pub use snapshot::{parse_archive_name, snapshot_file_name, Snapshot, TIMESTAMP_FORMAT};
pub use store::{SnapshotStore, DEFAULT_RETENTION};
