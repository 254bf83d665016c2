//! The save adapter capability.
//!
//! A save adapter knows how to talk to one monitored application: whether
//! it is running, which files it has open, and how to make it save one of
//! them. Everything application-specific lives behind this trait.

mod command;

pub use command::{CommandAdapterConfig, CommandSaveAdapter, DEFAULT_COMMAND_TIMEOUT_SECS};

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors reported by a save adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The application rejected or failed the request.
    #[error("{0}")]
    Failed(String),

    /// The request did not finish in time.
    #[error("{operation} timed out after {}s", after.as_secs_f32())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// IO error while talking to the application.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Create a failure error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Application-specific save capability.
///
/// `save` succeeding means the save request was delivered without error; it
/// does not prove the application actually wrote the file.
#[async_trait]
pub trait SaveAdapter: Send + Sync {
    /// Whether the application is currently running.
    async fn is_running(&self) -> bool;

    /// Absolute paths of the files the application currently has open.
    async fn list_open_files(&self) -> AdapterResult<HashSet<PathBuf>>;

    /// Ask the application to save `path`.
    async fn save(&self, path: &Path) -> AdapterResult<()>;
}
