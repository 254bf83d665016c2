//! Logging setup using tracing.
//!
//! Every binary calls [`init`] once at startup. Output goes to stderr so
//! command output on stdout stays clean.

use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

/// Verbosity of the log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by [`EnvFilter`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Case-insensitive parse; `warning` is accepted for `warn`.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            other => return Err(format!("unknown log level '{other}'")),
        };
        Ok(level)
    }
}

/// How [`init`] sets up the subscriber.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Write formatted events to stderr. When false, events are filtered
    /// but not printed.
    pub print: bool,
    /// Used when `RUST_LOG` is unset or invalid.
    pub level: LogLevel,
    /// Add source file and line to each event.
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            print: true,
            level: LogLevel::default(),
            include_location: false,
        }
    }
}

impl LogConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(config: LogConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());

    let result = if config.print {
        registry
            .with(
                tracing_fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
    } else {
        registry.try_init()
    };

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}
