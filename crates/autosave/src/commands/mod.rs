//! Command handlers for the autosave CLI.

pub mod config;
pub mod run;
pub mod snapshot;

pub use config::*;
pub use run::*;
pub use snapshot::*;
