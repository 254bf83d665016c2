//! The watch orchestrator.
//!
//! [`WatchOrchestrator`] owns every registered application. On each poll tick
//! it refreshes liveness and open files, keeps change subscriptions in step
//! with the watch set and fires timer saves that are due. Change events
//! trigger an immediate save of the affected file. Every save is
//! "force the application to save, then archive the file, then prune".
//!
//! At most one save per path is in flight. A trigger that arrives while the
//! path is being saved is dropped, not queued. Saves already started run to
//! completion, even across shutdown.

use crate::adapter::SaveAdapter;
use crate::application::{MonitoredApplication, Phase, Transition};
use crate::error::{CoreError, CoreResult};
use crate::event::{SaveTrigger, WatchEvent};
use crate::lock;
use crate::notifier::{ChangeEvent, ChangeNotifier};
use autosave_snapshot::{Snapshot, SnapshotStore, DEFAULT_RETENTION};
use autosave_util::TimingGuard;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Snapshots kept per (application, file).
    pub retention: usize,
    /// Time between poll ticks in [`WatchOrchestrator::run`].
    pub poll_interval: Duration,
    /// Change events this soon after a save of the same file are dropped.
    pub echo_window: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            poll_interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
            echo_window: Duration::from_millis(crate::config::DEFAULT_ECHO_WINDOW_MS),
        }
    }
}

/// Result of one save attempt.
#[derive(Debug)]
pub enum SaveOutcome {
    /// The application saved and the file was archived.
    Captured(Snapshot),
    /// The application failed to save. Nothing was archived.
    SaveFailed(String),
    /// The application saved but the file could not be archived.
    CaptureFailed(String),
}

impl SaveOutcome {
    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Captured(_))
    }
}

/// What became of a change event.
#[derive(Debug)]
pub enum ChangeDisposition {
    /// No registered application watches the path.
    Ignored,
    /// The change was caused by our own save.
    Echo,
    /// A save of the path is already in flight.
    Coalesced,
    /// A save was started.
    Dispatched(JoinHandle<SaveOutcome>),
}

/// Saves started by a poll tick.
#[derive(Debug, Default)]
pub struct PendingSaves {
    handles: Vec<JoinHandle<SaveOutcome>>,
    coalesced: usize,
}

impl PendingSaves {
    /// Number of saves started.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of due saves dropped because the path was already being saved.
    pub fn coalesced(&self) -> usize {
        self.coalesced
    }

    /// Wait for every started save to finish.
    pub async fn wait(self) -> Vec<SaveOutcome> {
        join_all(self.handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!("Save task failed: {}", e);
                    None
                }
            })
            .collect()
    }

    fn merge(&mut self, other: PendingSaves) {
        self.handles.extend(other.handles);
        self.coalesced += other.coalesced;
    }
}

/// Point-in-time view of one registered application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStatus {
    pub name: String,
    pub phase: Phase,
    /// Watched files, sorted.
    pub watched_files: Vec<PathBuf>,
    /// Watched files with a live change subscription.
    pub subscribed_files: usize,
    pub save_interval: Duration,
    pub last_save: Instant,
}

struct AppSlot {
    adapter: Arc<dyn SaveAdapter>,
    state: Mutex<MonitoredApplication>,
}

struct Inner {
    apps: RwLock<HashMap<String, Arc<AppSlot>>>,
    notifier: Arc<dyn ChangeNotifier>,
    store: SnapshotStore,
    config: OrchestratorConfig,
    in_flight: Mutex<HashSet<PathBuf>>,
    saves: TaskTracker,
    events: broadcast::Sender<WatchEvent>,
}

/// Exclusive claim on saving one path. Released on drop.
struct InFlight {
    inner: Arc<Inner>,
    path: PathBuf,
}

impl InFlight {
    fn claim(inner: &Arc<Inner>, path: &Path) -> Option<Self> {
        if !lock(&inner.in_flight).insert(path.to_path_buf()) {
            return None;
        }
        Some(Self {
            inner: Arc::clone(inner),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.inner.in_flight).remove(&self.path);
    }
}

/// Drives registered applications, their subscriptions and their saves.
#[derive(Clone)]
pub struct WatchOrchestrator {
    inner: Arc<Inner>,
}

impl WatchOrchestrator {
    /// Create an orchestrator archiving into `store`.
    pub fn new(
        store: SnapshotStore,
        notifier: Arc<dyn ChangeNotifier>,
        config: OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                apps: RwLock::new(HashMap::new()),
                notifier,
                store,
                config,
                in_flight: Mutex::new(HashSet::new()),
                saves: TaskTracker::new(),
                events,
            }),
        }
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.inner.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Register an application. A previous registration under the same
    /// name is replaced and its subscriptions are released.
    pub fn register<I, S>(
        &self,
        name: impl Into<String>,
        extensions: I,
        interval_secs: u64,
        adapter: Arc<dyn SaveAdapter>,
    ) where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        let slot = Arc::new(AppSlot {
            adapter,
            state: Mutex::new(MonitoredApplication::new(
                name.clone(),
                extensions,
                interval_secs,
                Instant::now(),
            )),
        });

        let previous = self.write_apps().insert(name.clone(), slot);
        if let Some(previous) = previous {
            debug!(app = %name, "Replacing existing registration");
            self.inner.retire(&previous);
        }

        info!(app = %name, interval_secs, "Registered application");
        self.inner.emit(WatchEvent::Registered { app: name });
    }

    /// Change an application's save interval.
    pub fn set_interval(&self, name: &str, secs: u64) -> CoreResult<()> {
        let slot = self
            .slot(name)
            .ok_or_else(|| CoreError::UnknownApplication(name.to_string()))?;
        lock(&slot.state).set_interval(secs);
        debug!(app = %name, secs, "Updated save interval");
        Ok(())
    }

    /// Stop watching an application and forget it.
    ///
    /// Does not wait for saves in flight; they finish but no longer touch
    /// the watch state. Returns false if the name was not registered.
    pub fn stop_watching(&self, name: &str) -> bool {
        let Some(slot) = self.write_apps().remove(name) else {
            debug!(app = %name, "Not registered, nothing to stop");
            return false;
        };
        self.inner.retire(&slot);

        info!(app = %name, "Stopped watching application");
        self.inner.emit(WatchEvent::Unregistered {
            app: name.to_string(),
        });
        true
    }

    /// Unregister every application.
    pub fn shutdown(&self) {
        let names: Vec<String> = self.read_apps().keys().cloned().collect();
        for name in names {
            self.stop_watching(&name);
        }
    }

    /// Names of registered applications, sorted.
    pub fn applications(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_apps().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&self, name: &str) -> Option<AppStatus> {
        let slot = self.slot(name)?;
        let state = lock(&slot.state);
        let mut watched_files: Vec<PathBuf> = state.watched_files().iter().cloned().collect();
        watched_files.sort();
        let subscribed_files = watched_files
            .iter()
            .filter(|p| state.has_subscription(p))
            .count();

        Some(AppStatus {
            name: state.name().to_string(),
            phase: state.phase(),
            watched_files,
            subscribed_files,
            save_interval: state.save_interval(),
            last_save: state.last_save(),
        })
    }

    /// Poll every application now.
    pub async fn tick(&self) -> PendingSaves {
        self.tick_at(Instant::now()).await
    }

    /// Poll every application, treating `now` as the current time.
    ///
    /// Applications are polled concurrently. Saves that become due are
    /// started in the background and returned.
    pub async fn tick_at(&self, now: Instant) -> PendingSaves {
        let slots: Vec<(String, Arc<AppSlot>)> = self
            .read_apps()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();

        let polls = slots
            .iter()
            .map(|(name, slot)| self.poll_app(name, slot, now));

        let mut pending = PendingSaves::default();
        for saves in join_all(polls).await {
            pending.merge(saves);
        }
        pending
    }

    async fn poll_app(&self, name: &str, slot: &Arc<AppSlot>, now: Instant) -> PendingSaves {
        let running = slot.adapter.is_running().await;
        let transition = lock(&slot.state).observe_liveness(running);

        match transition {
            Transition::Started => {
                info!(app = %name, "Application started");
                self.inner.emit(WatchEvent::Started {
                    app: name.to_string(),
                });
            }
            Transition::Stopped { released } => {
                for handle in released {
                    self.inner.notifier.unwatch(handle);
                }
                info!(app = %name, "Application stopped, released its files");
                self.inner.emit(WatchEvent::Stopped {
                    app: name.to_string(),
                });
                return PendingSaves::default();
            }
            Transition::Unchanged => {}
        }

        if !lock(&slot.state).is_running() {
            return PendingSaves::default();
        }

        match slot.adapter.list_open_files().await {
            Ok(open) => self.sync_watch_set(name, slot, open),
            Err(e) => warn!(app = %name, "Failed to list open files, keeping watch set: {}", e),
        }

        let due = {
            let state = lock(&slot.state);
            state.is_save_due(now).then(|| {
                let mut files: Vec<PathBuf> = state.watched_files().iter().cloned().collect();
                files.sort();
                files
            })
        };

        let mut pending = PendingSaves::default();
        if let Some(files) = due {
            debug!(app = %name, files = files.len(), "Timer save due");
            for path in files {
                match self.dispatch(name, slot, path, SaveTrigger::Timer, now) {
                    Some(handle) => pending.handles.push(handle),
                    None => pending.coalesced += 1,
                }
            }
        }
        pending
    }

    fn sync_watch_set(&self, name: &str, slot: &Arc<AppSlot>, open: HashSet<PathBuf>) {
        let diff = lock(&slot.state).apply_open_files(open);

        for (path, handle) in diff.removed {
            if let Some(handle) = handle {
                self.inner.notifier.unwatch(handle);
            }
            debug!(app = %name, path = %path.display(), "File closed, no longer watched");
            self.inner.emit(WatchEvent::FileReleased {
                app: name.to_string(),
                path,
            });
        }

        for path in diff.added {
            let live = match self.inner.notifier.watch(&path) {
                Ok(handle) => {
                    let stale = lock(&slot.state).attach_subscription(&path, handle);
                    match stale {
                        Some(refused) if refused == handle => {
                            self.inner.notifier.unwatch(refused);
                            debug!(
                                app = %name,
                                path = %path.display(),
                                "No longer watching, subscription dropped"
                            );
                            continue;
                        }
                        Some(replaced) => {
                            self.inner.notifier.unwatch(replaced);
                            true
                        }
                        None => true,
                    }
                }
                Err(e) => {
                    warn!(
                        app = %name,
                        path = %path.display(),
                        "Change notification unavailable, timer saves only: {}", e
                    );
                    false
                }
            };

            info!(app = %name, path = %path.display(), live, "Watching file");
            self.inner.emit(WatchEvent::FileWatched {
                app: name.to_string(),
                path,
                live,
            });
        }
    }

    /// React to a change notification.
    ///
    /// When several applications watch the path, the one with the lowest
    /// name handles it.
    pub fn handle_change(&self, event: ChangeEvent) -> ChangeDisposition {
        let owner = self
            .read_apps()
            .iter()
            .filter(|(_, slot)| lock(&slot.state).is_watching(&event.path))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)));

        let Some((name, slot)) = owner else {
            debug!(path = %event.path.display(), "Ignoring change to unwatched file");
            return ChangeDisposition::Ignored;
        };

        if lock(&slot.state).is_echo(&event.path, event.at, self.inner.config.echo_window) {
            debug!(app = %name, path = %event.path.display(), "Ignoring echo of our own save");
            return ChangeDisposition::Echo;
        }

        match self.dispatch(&name, &slot, event.path, SaveTrigger::Change, event.at) {
            Some(handle) => ChangeDisposition::Dispatched(handle),
            None => ChangeDisposition::Coalesced,
        }
    }

    /// Start a save of `path` unless one is already in flight.
    fn dispatch(
        &self,
        name: &str,
        slot: &Arc<AppSlot>,
        path: PathBuf,
        trigger: SaveTrigger,
        at: Instant,
    ) -> Option<JoinHandle<SaveOutcome>> {
        let Some(claim) = InFlight::claim(&self.inner, &path) else {
            debug!(
                app = %name,
                path = %path.display(),
                %trigger,
                "Save already in flight, dropping trigger"
            );
            return None;
        };

        let inner = Arc::clone(&self.inner);
        let slot = Arc::clone(slot);
        let name = name.to_string();
        Some(self.inner.saves.spawn(async move {
            let outcome = inner.perform_save(&name, &slot, &path, trigger, at).await;
            drop(claim);
            outcome
        }))
    }

    /// Poll and react to changes until `shutdown` is cancelled, then
    /// unregister everything and wait for saves still in flight.
    pub async fn run(
        &self,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        shutdown: CancellationToken,
    ) {
        let consumer = {
            let this = self.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { this.consume_changes(events, token).await })
        };

        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = self.inner.config.poll_interval.as_secs(),
            "Watch loop started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pending = self.tick().await;
                    if !pending.is_empty() {
                        debug!(saves = pending.len(), "Timer saves started");
                    }
                }
            }
        }

        if let Err(e) = consumer.await {
            warn!("Change consumer failed: {}", e);
        }
        self.shutdown();

        let in_flight = self.inner.saves.len();
        if in_flight > 0 {
            info!(saves = in_flight, "Waiting for saves in flight");
        }
        self.inner.saves.close();
        self.inner.saves.wait().await;
        info!("Watch loop stopped");
    }

    async fn consume_changes(
        &self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_change(event);
                    }
                    None => {
                        debug!("Change channel closed");
                        break;
                    }
                },
            }
        }
    }

    fn slot(&self, name: &str) -> Option<Arc<AppSlot>> {
        self.read_apps().get(name).cloned()
    }

    fn read_apps(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<AppSlot>>> {
        self.inner
            .apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_apps(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<AppSlot>>> {
        self.inner
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn emit(&self, event: WatchEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn retire(&self, slot: &AppSlot) {
        let released = lock(&slot.state).unregister();
        for handle in released {
            self.notifier.unwatch(handle);
        }
    }

    async fn perform_save(
        &self,
        name: &str,
        slot: &AppSlot,
        path: &Path,
        trigger: SaveTrigger,
        at: Instant,
    ) -> SaveOutcome {
        let _timing = TimingGuard::save(path.display().to_string());

        if let Err(e) = slot.adapter.save(path).await {
            warn!(app = %name, path = %path.display(), %trigger, "Save failed, will retry: {}", e);
            self.emit(WatchEvent::SaveFailed {
                app: name.to_string(),
                path: path.to_path_buf(),
                trigger,
                error: e.to_string(),
            });
            return SaveOutcome::SaveFailed(e.to_string());
        }

        let snapshot = match self.store.capture(path, name).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(app = %name, path = %path.display(), "Failed to archive file: {}", e);
                self.emit(WatchEvent::CaptureFailed {
                    app: name.to_string(),
                    path: path.to_path_buf(),
                    error: e.to_string(),
                });
                return SaveOutcome::CaptureFailed(e.to_string());
            }
        };

        lock(&slot.state).record_save(path, at);

        match self
            .store
            .prune(name, &snapshot.file_name, self.config.retention)
            .await
        {
            Ok(0) => {}
            Ok(removed) => {
                debug!(app = %name, file = %snapshot.file_name, removed, "Pruned old snapshots")
            }
            Err(e) => {
                warn!(app = %name, file = %snapshot.file_name, "Failed to prune snapshots: {}", e)
            }
        }

        info!(
            app = %name,
            path = %path.display(),
            snapshot = %snapshot.archive_name(),
            %trigger,
            "Captured snapshot"
        );
        self.emit(WatchEvent::SnapshotCaptured {
            app: name.to_string(),
            path: path.to_path_buf(),
            snapshot: snapshot.storage_path.clone(),
            trigger,
        });
        SaveOutcome::Captured(snapshot)
    }
}
