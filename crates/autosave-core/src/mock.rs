//! Scriptable test doubles for the orchestrator's collaborators.

use crate::adapter::{AdapterError, AdapterResult, SaveAdapter};
use crate::lock;
use crate::notifier::{
    ChangeEvent, ChangeNotifier, NotifierError, SubscriptionHandle, SubscriptionRegistry,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A [`SaveAdapter`] whose answers are set by the test.
///
/// Starts out not running with no open files. Saves succeed instantly and
/// do not touch the file unless told otherwise.
#[derive(Debug, Default)]
pub struct MockSaveAdapter {
    running: AtomicBool,
    open_files: Mutex<HashSet<PathBuf>>,
    fail_listing: AtomicBool,
    fail_saves: AtomicBool,
    save_delay: Mutex<Duration>,
    save_calls: AtomicUsize,
    active_saves: AtomicUsize,
    max_concurrent: AtomicUsize,
    saved: Mutex<Vec<PathBuf>>,
}

impl MockSaveAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_open_files<I, P>(&self, files: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        *lock(&self.open_files) = files.into_iter().map(Into::into).collect();
    }

    /// Make `list_open_files` fail.
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make `save` fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make every save take `delay`.
    pub fn set_save_delay(&self, delay: Duration) {
        *lock(&self.save_delay) = delay;
    }

    /// Total save requests, failed ones included.
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Highest number of saves observed running at once.
    pub fn max_concurrent_saves(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Paths of successful saves, in completion order.
    pub fn saved_paths(&self) -> Vec<PathBuf> {
        lock(&self.saved).clone()
    }
}

#[async_trait]
impl SaveAdapter for MockSaveAdapter {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn list_open_files(&self) -> AdapterResult<HashSet<PathBuf>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AdapterError::failed("scripted listing failure"));
        }
        Ok(lock(&self.open_files).clone())
    }

    async fn save(&self, path: &Path) -> AdapterResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_saves.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(active, Ordering::SeqCst);

        let delay = *lock(&self.save_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active_saves.fetch_sub(1, Ordering::SeqCst);

        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AdapterError::failed("scripted save failure"));
        }
        lock(&self.saved).push(path.to_path_buf());
        Ok(())
    }
}

/// A [`ChangeNotifier`] that never touches the OS. Tests emit changes by hand.
pub struct ManualChangeNotifier {
    registry: Mutex<SubscriptionRegistry>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ManualChangeNotifier {
    /// Create the notifier and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                registry: Mutex::new(SubscriptionRegistry::default()),
                tx,
            },
            rx,
        )
    }

    /// Report a change to `path` now. Returns false if nobody watches it.
    pub fn emit(&self, path: impl Into<PathBuf>) -> bool {
        self.emit_at(path, Instant::now())
    }

    /// Report a change to `path` observed at `at`.
    pub fn emit_at(&self, path: impl Into<PathBuf>, at: Instant) -> bool {
        let path = path.into();
        if !lock(&self.registry).is_interested(&path) {
            return false;
        }
        self.tx.send(ChangeEvent::at(path, at)).is_ok()
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        lock(&self.registry).is_interested(path)
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.registry).subscription_count()
    }
}

impl ChangeNotifier for ManualChangeNotifier {
    fn watch(&self, path: &Path) -> Result<SubscriptionHandle, NotifierError> {
        Ok(lock(&self.registry).subscribe(path).handle)
    }

    fn unwatch(&self, handle: SubscriptionHandle) {
        lock(&self.registry).unsubscribe(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_adapter_scripting() {
        let adapter = MockSaveAdapter::new();
        assert!(!adapter.is_running().await);
        assert!(adapter.list_open_files().await.unwrap().is_empty());

        adapter.set_running(true);
        adapter.set_open_files(["/docs/a.txt"]);
        assert!(adapter.is_running().await);
        assert_eq!(adapter.list_open_files().await.unwrap().len(), 1);

        adapter.set_fail_saves(true);
        assert!(adapter.save(Path::new("/docs/a.txt")).await.is_err());
        adapter.set_fail_saves(false);
        adapter.save(Path::new("/docs/a.txt")).await.unwrap();

        assert_eq!(adapter.save_calls(), 2);
        assert_eq!(adapter.saved_paths(), vec![PathBuf::from("/docs/a.txt")]);
        assert_eq!(adapter.max_concurrent_saves(), 1);
    }

    #[tokio::test]
    async fn test_manual_notifier_only_emits_for_watched_paths() {
        let (notifier, mut rx) = ManualChangeNotifier::new();
        assert!(!notifier.emit("/docs/a.txt"));

        let handle = notifier.watch(Path::new("/docs/a.txt")).unwrap();
        assert!(notifier.emit("/docs/a.txt"));
        assert_eq!(rx.recv().await.unwrap().path, PathBuf::from("/docs/a.txt"));

        notifier.unwatch(handle);
        assert!(!notifier.is_watched(Path::new("/docs/a.txt")));
        assert_eq!(notifier.subscription_count(), 0);
    }
}
