//! Core engine for autosave.
//!
//! This crate provides:
//! - The [`SaveAdapter`] capability and a shell-command implementation
//! - Per-application watch state ([`MonitoredApplication`])
//! - File-change notification ([`ChangeNotifier`])
//! - The [`WatchOrchestrator`] that ties them to the snapshot archive
//! - Configuration loading

pub mod adapter;
pub mod application;
pub mod config;
pub mod error;
pub mod event;
pub mod mock;
pub mod notifier;
pub mod orchestrator;

pub use adapter::{
    AdapterError, AdapterResult, CommandAdapterConfig, CommandSaveAdapter, SaveAdapter,
};
pub use application::{MonitoredApplication, Phase};
pub use config::{ApplicationConfig, Config};
pub use error::{ConfigError, CoreError, CoreResult};
pub use event::{SaveTrigger, WatchEvent};
pub use notifier::{
    ChangeEvent, ChangeNotifier, NotifierError, NotifyChangeNotifier, SubscriptionHandle,
};
pub use orchestrator::{
    AppStatus, ChangeDisposition, OrchestratorConfig, PendingSaves, SaveOutcome, WatchOrchestrator,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
