//! Error types for the core crate.

use crate::adapter::AdapterError;
use crate::notifier::NotifierError;
use autosave_snapshot::SnapshotError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Snapshot archive error.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Change notification error.
    #[error("notifier error: {0}")]
    Notifier(#[from] NotifierError),

    /// Save adapter error.
    #[error("save adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No application registered under this name.
    #[error("application not registered: {0}")]
    UnknownApplication(String),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Config validation failed.
    #[error("config validation failed: {message}")]
    Validation { message: String },

    /// An explicitly requested config file does not exist.
    #[error("config file not found: {path}")]
    NotFound { path: String },

    /// Environment variable not found during substitution.
    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    /// File reference not found during substitution.
    #[error("file reference not found: {path}")]
    FileRefNotFound { path: String },

    /// Invalid path (e.g., could not determine the data directory).
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl ConfigError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
