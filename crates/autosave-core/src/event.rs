//! Observer events emitted by the orchestrator.

use serde::Serialize;
use std::path::PathBuf;

/// What caused a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveTrigger {
    /// The application's save interval elapsed.
    Timer,
    /// The file changed on disk.
    Change,
}

impl std::fmt::Display for SaveTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timer => write!(f, "timer"),
            Self::Change => write!(f, "change"),
        }
    }
}

/// Progress reported to observers such as a UI log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEvent {
    Registered {
        app: String,
    },
    Unregistered {
        app: String,
    },
    /// The application was seen running.
    Started {
        app: String,
    },
    /// The application was seen gone.
    Stopped {
        app: String,
    },
    /// A file entered the watch set. `live` is false when it only gets
    /// timer-triggered saves because the change subscription failed.
    FileWatched {
        app: String,
        path: PathBuf,
        live: bool,
    },
    FileReleased {
        app: String,
        path: PathBuf,
    },
    SnapshotCaptured {
        app: String,
        path: PathBuf,
        snapshot: PathBuf,
        trigger: SaveTrigger,
    },
    SaveFailed {
        app: String,
        path: PathBuf,
        trigger: SaveTrigger,
        error: String,
    },
    CaptureFailed {
        app: String,
        path: PathBuf,
        error: String,
    },
}

impl WatchEvent {
    /// Application the event concerns.
    pub fn app(&self) -> &str {
        match self {
            Self::Registered { app }
            | Self::Unregistered { app }
            | Self::Started { app }
            | Self::Stopped { app }
            | Self::FileWatched { app, .. }
            | Self::FileReleased { app, .. }
            | Self::SnapshotCaptured { app, .. }
            | Self::SaveFailed { app, .. }
            | Self::CaptureFailed { app, .. } => app,
        }
    }
}
