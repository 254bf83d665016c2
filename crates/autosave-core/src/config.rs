//! Configuration management.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config (`~/.config/autosave/autosave.json[c]`)
//! 2. An explicitly supplied config file
//! 3. `AUTOSAVE_*` environment overrides

use crate::adapter::CommandAdapterConfig;
use crate::application::DEFAULT_SAVE_INTERVAL_SECS;
use crate::error::{ConfigError, CoreResult};
use crate::orchestrator::OrchestratorConfig;
use autosave_snapshot::DEFAULT_RETENTION;
use autosave_util::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Default seconds between liveness and open-file polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default window after a save in which change events for that file are dropped.
pub const DEFAULT_ECHO_WINDOW_MS: u64 = 500;

const CONFIG_FILE_NAMES: &[&str] = &["autosave.jsonc", "autosave.json"];

static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the snapshot archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<PathBuf>,

    /// Snapshots kept per (application, file).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<usize>,

    /// Seconds between polls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,

    /// Echo suppression window in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo_window_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Monitored applications keyed by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub applications: BTreeMap<String, ApplicationConfig>,
}

/// Per-application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Extensions of files worth protecting. Empty means every file.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Seconds between timer-triggered saves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    /// How to drive the application.
    #[serde(default)]
    pub adapter: CommandAdapterConfig,
}

impl ApplicationConfig {
    /// Effective save interval in seconds.
    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.unwrap_or(DEFAULT_SAVE_INTERVAL_SECS)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Returns the merged config and the files it was read from.
    pub async fn load(explicit: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = autosave_util::path::config_dir() {
            for name in CONFIG_FILE_NAMES {
                let path = global_dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.display().to_string(),
                }
                .into());
            }
            config = config.merge(Self::load_file(path).await?);
            sources.push(path.to_path_buf());
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;

        tracing::debug!(sources = ?sources, "Loaded configuration");
        Ok((config, sources))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Substitute `{env:NAME}` and `{file:path}` references.
    ///
    /// File references are resolved relative to the config file.
    fn substitute_variables(content: &str, config_path: &Path) -> CoreResult<String> {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut result = content.to_string();

        for cap in var_regex().captures_iter(content) {
            let (Some(full), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2)) else {
                continue;
            };
            let value = value.as_str();

            let replacement = match kind.as_str() {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                })?,
                "file" => {
                    let file_path = config_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                        .trim()
                        .to_string()
                }
                _ => continue,
            };

            result = result.replace(full.as_str(), &json_escape(&replacement));
        }

        Ok(result)
    }

    /// Merge another config into this one (other takes precedence).
    ///
    /// Applications are replaced whole by name.
    pub fn merge(mut self, other: Self) -> Self {
        if other.archive_dir.is_some() {
            self.archive_dir = other.archive_dir;
        }
        if other.retention.is_some() {
            self.retention = other.retention;
        }
        if other.poll_interval_secs.is_some() {
            self.poll_interval_secs = other.poll_interval_secs;
        }
        if other.echo_window_ms.is_some() {
            self.echo_window_ms = other.echo_window_ms;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        self.applications.extend(other.applications);
        self
    }

    /// Apply `AUTOSAVE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("AUTOSAVE_ARCHIVE_DIR").filter(|v| !v.is_empty()) {
            self.archive_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup("AUTOSAVE_RETENTION") {
            self.retention = Some(parse_env("AUTOSAVE_RETENTION", &value)?);
        }
        if let Some(value) = lookup("AUTOSAVE_POLL_INTERVAL") {
            self.poll_interval_secs = Some(parse_env("AUTOSAVE_POLL_INTERVAL", &value)?);
        }
        Ok(())
    }

    /// Check the merged configuration.
    pub fn validate(&self) -> CoreResult<()> {
        if self.retention == Some(0) {
            return Err(ConfigError::validation("retention must be at least 1").into());
        }
        if self.poll_interval_secs == Some(0) {
            return Err(ConfigError::validation("poll_interval_secs must be at least 1").into());
        }
        if let Some(level) = &self.log_level {
            if LogLevel::parse(level).is_none() {
                return Err(ConfigError::validation(format!("unknown log_level '{level}'")).into());
            }
        }
        for (name, app) in &self.applications {
            if name.trim().is_empty() {
                return Err(ConfigError::validation("application names must not be empty").into());
            }
            if app.adapter.save.trim().is_empty() {
                return Err(ConfigError::validation(format!(
                    "application '{name}' has no save command"
                ))
                .into());
            }
            if app.interval_secs == Some(0) {
                return Err(ConfigError::validation(format!(
                    "application '{name}' interval_secs must be at least 1"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Effective archive root.
    pub fn archive_dir(&self) -> CoreResult<PathBuf> {
        match &self.archive_dir {
            Some(dir) => Ok(dir.clone()),
            None => autosave_util::path::default_archive_dir().ok_or_else(|| {
                ConfigError::InvalidPath("Could not determine data directory".to_string()).into()
            }),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention.unwrap_or(DEFAULT_RETENTION)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS))
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms.unwrap_or(DEFAULT_ECHO_WINDOW_MS))
    }

    /// Configured log level, if it names a known level.
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Orchestrator settings derived from this config.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retention: self.retention(),
            poll_interval: self.poll_interval(),
            echo_window: self.echo_window(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> CoreResult<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::validation(format!("{name} must be a non-negative integer, got '{value}'"))
            .into()
    })
}

/// Escape a substituted value so it stays valid inside a JSON string.
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Strip `//` and `/* */` comments outside of strings.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if in_string {
            result.push(c);
            if escape_next {
                escape_next = false;
            } else if c == '\\' {
                escape_next = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    // Keep line numbers stable for parse errors
                    if c == '\n' {
                        result.push('\n');
                    }
                    prev = c;
                }
            }
            _ => result.push(c),
        }
    }

    result
}
