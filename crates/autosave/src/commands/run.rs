//! The watch service.

use anyhow::Context;
use autosave_core::{CommandSaveAdapter, Config, NotifyChangeNotifier, WatchOrchestrator};
use autosave_snapshot::SnapshotStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Register every configured application and watch until Ctrl-C.
pub async fn run_service(config: &Config) -> anyhow::Result<()> {
    let archive_dir = config.archive_dir()?;
    let store = SnapshotStore::new(archive_dir.clone())
        .await
        .with_context(|| format!("Cannot use archive at {}", archive_dir.display()))?;

    let (notifier, changes) =
        NotifyChangeNotifier::new().context("Failed to start change notification")?;
    let orchestrator =
        WatchOrchestrator::new(store, Arc::new(notifier), config.orchestrator_config());

    if config.applications.is_empty() {
        warn!("No applications configured, nothing to watch");
    }
    for (name, app) in &config.applications {
        let adapter = CommandSaveAdapter::new(name.clone(), app.adapter.clone());
        orchestrator.register(
            name.clone(),
            &app.extensions,
            app.interval_secs(),
            Arc::new(adapter),
        );
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    info!(
        archive = %archive_dir.display(),
        applications = config.applications.len(),
        "Autosave running"
    );
    orchestrator.run(changes, shutdown).await;
    Ok(())
}
