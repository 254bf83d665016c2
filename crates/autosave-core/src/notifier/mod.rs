//! File-change notification.
//!
//! A [`ChangeNotifier`] turns interest in individual files into OS-level
//! subscriptions and reports changes on a single ordered channel. Interest
//! is reference counted: several watchers of one path share one
//! subscription, and the last `unwatch` tears the OS resource down.

mod fs;
mod registry;

pub use fs::NotifyChangeNotifier;
pub(crate) use registry::SubscriptionRegistry;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::Instant;

/// Errors raised while subscribing to change notifications.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// The OS refused the subscription.
    #[error("failed to watch {}: {message}", path.display())]
    Subscribe { path: PathBuf, message: String },

    /// The notification backend could not be started.
    #[error("change notification unavailable: {0}")]
    Backend(String),
}

impl NotifierError {
    /// Create a subscription error.
    pub fn subscribe(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Opaque token returned by [`ChangeNotifier::watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub(crate) u64);

/// A change to a watched file.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The file that changed.
    pub path: PathBuf,
    /// Monotonic time the change was observed.
    pub at: Instant,
    /// Wall-clock time the change was observed.
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// An event observed right now.
    pub fn now(path: impl Into<PathBuf>) -> Self {
        Self::at(path, Instant::now())
    }

    /// An event observed at a specific instant.
    pub fn at(path: impl Into<PathBuf>, at: Instant) -> Self {
        Self {
            path: path.into(),
            at,
            observed_at: Utc::now(),
        }
    }
}

/// Subscribes to changes of individual files.
///
/// Events are delivered on the channel handed out when the notifier is
/// created. Events for paths nobody is interested in are dropped.
#[cfg_attr(test, mockall::automock)]
pub trait ChangeNotifier: Send + Sync {
    /// Register interest in `path`.
    fn watch(&self, path: &Path) -> Result<SubscriptionHandle, NotifierError>;

    /// Release a subscription. Unknown handles are ignored.
    fn unwatch(&self, handle: SubscriptionHandle);
}
