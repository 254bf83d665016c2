//! End-to-end tests for the watch orchestrator.
//!
//! These drive a real snapshot archive through scripted adapters and a
//! hand-fed change notifier, with poll ticks at chosen instants.

use autosave_core::mock::{ManualChangeNotifier, MockSaveAdapter};
use autosave_core::{
    ChangeDisposition, ChangeEvent, OrchestratorConfig, Phase, SaveOutcome, WatchEvent,
    WatchOrchestrator,
};
use autosave_snapshot::SnapshotStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::Instant;

struct Harness {
    _dir: TempDir,
    docs: PathBuf,
    orchestrator: WatchOrchestrator,
    notifier: Arc<ManualChangeNotifier>,
    changes: mpsc::UnboundedReceiver<ChangeEvent>,
    editor: Arc<MockSaveAdapter>,
    start: Instant,
}

impl Harness {
    /// An "Editor" watching `.txt` files with a 5 second interval.
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();

        let store = SnapshotStore::new(dir.path().join("archive")).await.unwrap();
        let (notifier, changes) = ManualChangeNotifier::new();
        let notifier = Arc::new(notifier);
        let orchestrator =
            WatchOrchestrator::new(store, notifier.clone(), OrchestratorConfig::default());

        let editor = Arc::new(MockSaveAdapter::new());
        orchestrator.register("Editor", [".txt"], 5, editor.clone());
        let start = Instant::now();

        Self {
            _dir: dir,
            docs,
            orchestrator,
            notifier,
            changes,
            editor,
            start,
        }
    }

    fn doc(&self, name: &str, content: &str) -> PathBuf {
        let path = self.docs.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn at(&self, secs: u64) -> Instant {
        self.start + Duration::from_secs(secs)
    }

    /// Emit a change through the notifier and hand it to the orchestrator.
    async fn change(&mut self, path: &Path, secs: u64) -> ChangeDisposition {
        assert!(self.notifier.emit_at(path, self.at(secs)), "path not watched");
        let event = self.changes.recv().await.unwrap();
        self.orchestrator.handle_change(event)
    }

    async fn snapshots(&self, file_name: &str) -> usize {
        self.orchestrator
            .store()
            .list_snapshots("Editor", file_name)
            .await
            .unwrap()
            .len()
    }

    fn last_save(&self) -> Instant {
        self.orchestrator.status("Editor").unwrap().last_save
    }
}

async fn settle(disposition: ChangeDisposition) -> SaveOutcome {
    match disposition {
        ChangeDisposition::Dispatched(handle) => handle.await.unwrap(),
        other => panic!("expected a dispatched save, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timer_save_then_immediate_change_save() {
    let mut h = Harness::new().await;
    let a = h.doc("a.txt", "first draft");
    h.editor.set_running(true);
    h.editor.set_open_files([a.clone()]);

    assert!(h.orchestrator.tick_at(h.at(0)).await.is_empty());
    assert_eq!(h.snapshots("a.txt").await, 0);

    let outcomes = h.orchestrator.tick_at(h.at(5)).await.wait().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(h.snapshots("a.txt").await, 1);
    assert_eq!(h.last_save(), h.at(5));

    std::fs::write(&a, "second draft").unwrap();
    let outcome = settle(h.change(&a, 6).await).await;
    let SaveOutcome::Captured(snapshot) = outcome else {
        panic!("change save was not captured");
    };
    assert!(snapshot.is_from(&a));
    assert_eq!(
        std::fs::read_to_string(&snapshot.storage_path).unwrap(),
        "second draft"
    );
    assert_eq!(h.snapshots("a.txt").await, 2);
    assert_eq!(h.last_save(), h.at(6));
    assert_eq!(h.editor.saved_paths(), vec![a.clone(), a]);
}

#[tokio::test]
async fn test_retention_keeps_newest_five() {
    let mut h = Harness::new().await;
    let a = h.doc("a.txt", "v0");
    h.editor.set_running(true);
    h.editor.set_open_files([a.clone()]);
    h.orchestrator.tick_at(h.at(0)).await;

    for secs in 1..=6 {
        std::fs::write(&a, format!("v{secs}")).unwrap();
        assert!(settle(h.change(&a, secs).await).await.is_captured());
    }

    let snapshots = h
        .orchestrator
        .store()
        .list_snapshots("Editor", "a.txt")
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 5);
    assert_eq!(
        std::fs::read_to_string(&snapshots[0].storage_path).unwrap(),
        "v6"
    );
}

#[tokio::test]
async fn test_rapid_triggers_coalesce() {
    let mut h = Harness::new().await;
    let a = h.doc("a.txt", "draft");
    h.editor.set_running(true);
    h.editor.set_open_files([a.clone()]);
    h.editor.set_save_delay(Duration::from_millis(300));
    h.orchestrator.tick_at(h.at(0)).await;

    let timer = h.orchestrator.tick_at(h.at(5)).await;
    assert_eq!(timer.len(), 1);

    assert!(matches!(h.change(&a, 6).await, ChangeDisposition::Coalesced));
    let again = h.orchestrator.tick_at(h.at(10)).await;
    assert!(again.is_empty());
    assert_eq!(again.coalesced(), 1);

    let outcomes = timer.wait().await;
    assert!(outcomes[0].is_captured());
    assert_eq!(h.editor.save_calls(), 1);
    assert_eq!(h.editor.max_concurrent_saves(), 1);

    // The claim is gone once the save finished
    assert!(settle(h.change(&a, 20).await).await.is_captured());
    assert_eq!(h.editor.max_concurrent_saves(), 1);
}

#[tokio::test]
async fn test_stopped_application_releases_files() {
    let h = Harness::new().await;
    let a = h.doc("a.txt", "draft");
    h.editor.set_running(true);
    h.editor.set_open_files([a.clone()]);
    let mut events = h.orchestrator.subscribe();

    h.orchestrator.tick_at(h.at(0)).await;
    assert_eq!(h.notifier.subscription_count(), 1);

    h.editor.set_running(false);
    assert!(h.orchestrator.tick_at(h.at(1)).await.is_empty());

    let status = h.orchestrator.status("Editor").unwrap();
    assert_eq!(status.phase, Phase::Idle);
    assert!(status.watched_files.is_empty());
    assert_eq!(h.notifier.subscription_count(), 0);

    // A change that slipped through before teardown is ignored
    let stray = h.orchestrator.handle_change(ChangeEvent::at(&a, h.at(2)));
    assert!(matches!(stray, ChangeDisposition::Ignored));
    assert!(h.orchestrator.tick_at(h.at(30)).await.is_empty());
    assert_eq!(h.editor.save_calls(), 0);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&WatchEvent::Started {
        app: "Editor".to_string()
    }));
    assert!(seen.contains(&WatchEvent::Stopped {
        app: "Editor".to_string()
    }));
}

#[tokio::test]
async fn test_watch_set_tracks_filtered_listing() {
    let h = Harness::new().await;
    let a = h.docs.join("a.txt");
    let b = h.docs.join("b.TXT");
    let e = h.docs.join("e.txt");
    h.editor.set_running(true);
    h.editor.set_open_files([
        a.clone(),
        b.clone(),
        h.docs.join("c.md"),
        h.docs.join("README"),
    ]);

    h.orchestrator.tick_at(h.at(0)).await;
    let status = h.orchestrator.status("Editor").unwrap();
    assert_eq!(status.watched_files, vec![a.clone(), b.clone()]);
    assert_eq!(status.subscribed_files, 2);

    h.editor.set_open_files([b.clone(), e.clone()]);
    h.orchestrator.tick_at(h.at(1)).await;
    let status = h.orchestrator.status("Editor").unwrap();
    assert_eq!(status.watched_files, vec![b.clone(), e.clone()]);
    assert_eq!(h.notifier.subscription_count(), 2);
    assert!(!h.notifier.is_watched(&a));
    assert!(h.notifier.is_watched(&b));
    assert!(h.notifier.is_watched(&e));
}

#[tokio::test]
async fn test_failed_save_is_retried_next_tick() {
    let h = Harness::new().await;
    let a = h.doc("a.txt", "draft");
    h.editor.set_running(true);
    h.editor.set_open_files([a.clone()]);
    h.orchestrator.tick_at(h.at(0)).await;
    let registered = h.last_save();

    h.editor.set_fail_saves(true);
    let outcomes = h.orchestrator.tick_at(h.at(5)).await.wait().await;
    assert!(matches!(outcomes[..], [SaveOutcome::SaveFailed(_)]));
    assert_eq!(h.last_save(), registered);
    assert_eq!(h.snapshots("a.txt").await, 0);

    h.editor.set_fail_saves(false);
    let outcomes = h.orchestrator.tick_at(h.at(6)).await.wait().await;
    assert!(outcomes[0].is_captured());
    assert_eq!(h.last_save(), h.at(6));
    assert_eq!(h.snapshots("a.txt").await, 1);
}

#[tokio::test]
async fn test_unregister_lets_inflight_save_finish() {
    let h = Harness::new().await;
    let a = h.doc("a.txt", "draft");
    h.editor.set_running(true);
    h.editor.set_open_files([a.clone()]);
    h.editor.set_save_delay(Duration::from_millis(200));
    h.orchestrator.tick_at(h.at(0)).await;

    let pending = h.orchestrator.tick_at(h.at(5)).await;
    assert_eq!(pending.len(), 1);

    assert!(h.orchestrator.stop_watching("Editor"));
    assert!(!h.orchestrator.stop_watching("Editor"));
    assert_eq!(h.notifier.subscription_count(), 0);
    assert!(h.orchestrator.status("Editor").is_none());

    let outcomes = pending.wait().await;
    assert!(outcomes[0].is_captured());
    assert_eq!(h.snapshots("a.txt").await, 1);
    assert_eq!(h.notifier.subscription_count(), 0);
    assert!(h.orchestrator.tick_at(h.at(60)).await.is_empty());
}

#[tokio::test]
async fn test_applications_are_archived_separately() {
    let h = Harness::new().await;
    let a = h.doc("a.txt", "editor copy");
    let viewer = Arc::new(MockSaveAdapter::new());
    h.orchestrator.register("Viewer", ["txt"], 5, viewer.clone());

    h.editor.set_running(true);
    h.editor.set_open_files([a.clone()]);
    viewer.set_running(true);
    viewer.set_open_files([h.doc("b.txt", "viewer copy")]);

    h.orchestrator.tick_at(h.at(0)).await;
    let outcomes = h.orchestrator.tick_at(h.at(60)).await.wait().await;
    assert_eq!(outcomes.len(), 2);

    let mut apps = h.orchestrator.store().applications().await.unwrap();
    apps.sort();
    assert_eq!(apps, vec!["Editor", "Viewer"]);
    assert_eq!(h.snapshots("a.txt").await, 1);
    assert_eq!(h.snapshots("b.txt").await, 0);
}
