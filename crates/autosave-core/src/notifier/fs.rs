//! Change notifier backed by the `notify` crate.

use super::{ChangeEvent, ChangeNotifier, NotifierError, SubscriptionHandle, SubscriptionRegistry};
use crate::lock;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// OS-backed [`ChangeNotifier`].
///
/// The watcher and the registry sit behind separate locks: the notify
/// callback thread only ever takes the registry lock, while `watch` and
/// `unwatch` hold the watcher lock across the OS call.
pub struct NotifyChangeNotifier {
    watcher: Mutex<RecommendedWatcher>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
}

impl NotifyChangeNotifier {
    /// Start the backend. Change events arrive on the returned receiver.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<ChangeEvent>), NotifierError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Mutex::new(SubscriptionRegistry::default()));

        let interest = Arc::clone(&registry);
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if !is_content_change(&event.kind) {
                        return;
                    }
                    let registry = lock(&interest);
                    for path in event.paths {
                        if registry.is_interested(&path) {
                            let _ = tx.send(ChangeEvent::now(path));
                        }
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|e| NotifierError::Backend(e.to_string()))?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
                registry,
            },
            rx,
        ))
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        lock(&self.registry).subscription_count()
    }
}

impl ChangeNotifier for NotifyChangeNotifier {
    fn watch(&self, path: &Path) -> Result<SubscriptionHandle, NotifierError> {
        let mut watcher = lock(&self.watcher);
        let subscribed = lock(&self.registry).subscribe(path);

        if let Some(dir) = subscribed.arm {
            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                lock(&self.registry).unsubscribe(subscribed.handle);
                return Err(NotifierError::subscribe(path, e.to_string()));
            }
            debug!(dir = %dir.display(), "Armed directory watch");
        }

        Ok(subscribed.handle)
    }

    fn unwatch(&self, handle: SubscriptionHandle) {
        let mut watcher = lock(&self.watcher);
        let released = lock(&self.registry).unsubscribe(handle);

        if let Some(dir) = released {
            match watcher.unwatch(&dir) {
                Ok(()) => debug!(dir = %dir.display(), "Released directory watch"),
                Err(e) => debug!(dir = %dir.display(), "Directory watch already gone: {}", e),
            }
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_content_change_filter() {
        use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind};

        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(!is_content_change(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Read)));
    }

    #[tokio::test]
    async fn test_reports_only_interesting_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let watched = root.join("a.txt");
        let ignored = root.join("b.txt");
        std::fs::write(&watched, "v1").unwrap();
        std::fs::write(&ignored, "v1").unwrap();

        let (notifier, mut rx) = NotifyChangeNotifier::new().unwrap();
        notifier.watch(&watched).unwrap();

        std::fs::write(&ignored, "v2").unwrap();
        std::fs::write(&watched, "v2").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no change event")
            .expect("channel closed");
        assert_eq!(event.path, watched);
    }

    #[tokio::test]
    async fn test_shared_subscription_survives_one_unwatch() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "v1").unwrap();

        let (notifier, _rx) = NotifyChangeNotifier::new().unwrap();
        let first = notifier.watch(&file).unwrap();
        let second = notifier.watch(&file).unwrap();
        assert_eq!(notifier.subscription_count(), 2);

        notifier.unwatch(first);
        assert_eq!(notifier.subscription_count(), 1);
        notifier.unwatch(second);
        notifier.unwatch(second);
        assert_eq!(notifier.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_fails_subscription() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("missing").join("a.txt");

        let (notifier, _rx) = NotifyChangeNotifier::new().unwrap();
        let err = notifier.watch(&file).unwrap_err();
        assert!(matches!(err, NotifierError::Subscribe { .. }));
        assert_eq!(notifier.subscription_count(), 0);
    }
}
