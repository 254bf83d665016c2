//! Snapshot error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The file to archive (or the archived copy to restore from) could not be read.
    #[error("source unavailable: {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive directory or the restore target could not be written.
    #[error("destination unwritable: {}: {source}", path.display())]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive root itself could not be created. No capture can succeed.
    #[error("archive root unavailable: {}: {source}", path.display())]
    ArchiveRootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot not found.
    #[error("snapshot not found: {0}")]
    NotFound(String),

    /// A file, snapshot or application name that cannot be used in the archive.
    #[error("invalid name: {0}")]
    InvalidName(String),
}

impl SnapshotError {
    pub(crate) fn source_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn destination_unwritable(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::DestinationUnwritable {
            path: path.into(),
            source,
        }
    }

    /// Create a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Whether the failure only affects the current cycle.
    ///
    /// Everything except a missing archive root is retried on the next
    /// poll tick or change event.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ArchiveRootUnavailable { .. })
    }
}
