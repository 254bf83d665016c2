//! Per-application watch state.
//!
//! [`MonitoredApplication`] holds everything the orchestrator knows about one
//! application: liveness, the files it has open, their change subscriptions
//! and the save cadence. It performs no IO; the orchestrator feeds it
//! observations and acts on what it returns.

use crate::notifier::SubscriptionHandle;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Default timer cadence for forced saves.
pub const DEFAULT_SAVE_INTERVAL_SECS: u64 = 300;

/// Watch phase of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not running; nothing is watched.
    Idle,
    /// Running; open files are tracked and saved.
    Active,
}

/// Liveness change observed on a poll tick.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition {
    /// No change.
    Unchanged,
    /// The application came up. Its watch set starts empty.
    Started,
    /// The application went away. The released subscriptions must be
    /// handed back to the notifier.
    Stopped { released: Vec<SubscriptionHandle> },
}

/// Outcome of comparing a fresh open-file listing with the watch set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WatchDiff {
    /// Files that entered the watch set and still need a subscription.
    pub added: Vec<PathBuf>,
    /// Files that left the watch set, with the subscription to release.
    pub removed: Vec<(PathBuf, Option<SubscriptionHandle>)>,
}

/// Watch state of one monitored application.
#[derive(Debug)]
pub struct MonitoredApplication {
    name: String,
    match_extensions: BTreeSet<String>,
    is_running: bool,
    watched_files: HashSet<PathBuf>,
    subscriptions: HashMap<PathBuf, SubscriptionHandle>,
    save_interval: Duration,
    last_save: Instant,
    last_file_save: HashMap<PathBuf, Instant>,
    retired: bool,
}

impl MonitoredApplication {
    /// Register an application.
    ///
    /// Extensions are matched case-insensitively with or without their
    /// leading dot; an empty list matches every file. The save timer starts
    /// at `now`.
    pub fn new<I, S>(
        name: impl Into<String>,
        extensions: I,
        interval_secs: u64,
        now: Instant,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            match_extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            is_running: false,
            watched_files: HashSet::new(),
            subscriptions: HashMap::new(),
            save_interval: Duration::from_secs(interval_secs),
            last_save: now,
            last_file_save: HashMap::new(),
            retired: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn phase(&self) -> Phase {
        if self.is_running {
            Phase::Active
        } else {
            Phase::Idle
        }
    }

    /// Files currently believed open.
    pub fn watched_files(&self) -> &HashSet<PathBuf> {
        &self.watched_files
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_files.contains(path)
    }

    /// Whether `path` has a live change subscription (as opposed to
    /// timer-only triggering).
    pub fn has_subscription(&self, path: &Path) -> bool {
        self.subscriptions.contains_key(path)
    }

    pub fn save_interval(&self) -> Duration {
        self.save_interval
    }

    /// Change the timer cadence.
    pub fn set_interval(&mut self, secs: u64) {
        self.save_interval = Duration::from_secs(secs);
    }

    pub fn last_save(&self) -> Instant {
        self.last_save
    }

    /// Whether `path` passes the extension filter.
    pub fn matches(&self, path: &Path) -> bool {
        if self.match_extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.match_extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    /// Whether the application has been unregistered.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Stop watching for good, handing back every subscription.
    ///
    /// Later observations are ignored and late subscriptions are refused.
    pub fn unregister(&mut self) -> Vec<SubscriptionHandle> {
        self.retired = true;
        self.is_running = false;
        self.release_all()
    }

    /// Record the latest liveness observation.
    pub fn observe_liveness(&mut self, running: bool) -> Transition {
        if self.retired {
            return Transition::Unchanged;
        }
        match (self.is_running, running) {
            (false, true) => {
                self.is_running = true;
                self.watched_files.clear();
                Transition::Started
            }
            (true, false) => {
                self.is_running = false;
                Transition::Stopped {
                    released: self.release_all(),
                }
            }
            _ => Transition::Unchanged,
        }
    }

    /// Bring the watch set in line with a fresh open-file listing.
    ///
    /// Files outside the extension filter are ignored. Removed files leave
    /// the watch set immediately; added files join it and wait for
    /// [`attach_subscription`](Self::attach_subscription).
    pub fn apply_open_files(&mut self, open: impl IntoIterator<Item = PathBuf>) -> WatchDiff {
        if !self.is_running {
            return WatchDiff::default();
        }
        let open: HashSet<PathBuf> = open.into_iter().filter(|p| self.matches(p)).collect();

        let mut removed: Vec<_> = self
            .watched_files
            .difference(&open)
            .cloned()
            .map(|path| {
                let handle = self.subscriptions.remove(&path);
                (path, handle)
            })
            .collect();
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        for (path, _) in &removed {
            self.watched_files.remove(path);
            self.last_file_save.remove(path);
        }

        let mut added: Vec<_> = open.difference(&self.watched_files).cloned().collect();
        added.sort();
        self.watched_files.extend(added.iter().cloned());

        WatchDiff { added, removed }
    }

    /// Store the subscription obtained for a newly watched file.
    ///
    /// Returns a handle the caller must release: the new one when the file
    /// left the set (or the application stopped) while the subscription was
    /// being set up, or a previous one it replaced.
    pub fn attach_subscription(
        &mut self,
        path: &Path,
        handle: SubscriptionHandle,
    ) -> Option<SubscriptionHandle> {
        if !self.is_running || !self.watched_files.contains(path) {
            return Some(handle);
        }
        self.subscriptions.insert(path.to_path_buf(), handle)
    }

    /// Clear the watch set and hand back every subscription.
    pub fn release_all(&mut self) -> Vec<SubscriptionHandle> {
        self.watched_files.clear();
        self.last_file_save.clear();
        let mut handles: Vec<_> = self.subscriptions.drain().map(|(_, h)| h).collect();
        handles.sort();
        handles
    }

    /// Whether the timer-triggered save is due.
    pub fn is_save_due(&self, now: Instant) -> bool {
        self.is_running && now.saturating_duration_since(self.last_save) >= self.save_interval
    }

    /// Record a successful save of `path` triggered at `at`.
    pub fn record_save(&mut self, path: &Path, at: Instant) {
        if at > self.last_save {
            self.last_save = at;
        }
        if self.watched_files.contains(path) {
            self.last_file_save.insert(path.to_path_buf(), Instant::now());
        }
    }

    /// Whether a change event at `at` is the echo of our own save of `path`.
    pub fn is_echo(&self, path: &Path, at: Instant, window: Duration) -> bool {
        self.last_file_save
            .get(path)
            .is_some_and(|saved| at.saturating_duration_since(*saved) < window && at >= *saved)
    }
}
