//! Shared utilities for autosave.
//!
//! This crate provides common utilities used across the autosave workspace:
//! - Logging setup with tracing
//! - Platform directories for config, data and the snapshot archive
//! - RAII timing for save cycles

pub mod log;
pub mod path;
pub mod timing;

pub use log::{LogConfig, LogLevel};
pub use timing::TimingGuard;
