//! Save adapter driven by configured shell commands.

use super::{AdapterError, AdapterResult, SaveAdapter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default bound on every adapter command.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;

fn default_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

/// Shell commands describing how to drive one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAdapterConfig {
    /// Liveness probe; exit status 0 means running. Absent means always running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<String>,

    /// Prints one open file path per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_files: Option<String>,

    /// Fixed open-file set, used when `list_files` is absent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,

    /// Save command; `{path}` is replaced with the quoted file path.
    #[serde(default)]
    pub save: String,

    /// Timeout for each command in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CommandAdapterConfig {
    fn default() -> Self {
        Self {
            running: None,
            list_files: None,
            files: Vec::new(),
            save: String::new(),
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

/// A [`SaveAdapter`] that shells out for every capability.
pub struct CommandSaveAdapter {
    name: String,
    config: CommandAdapterConfig,
    timeout: Duration,
}

impl CommandSaveAdapter {
    /// Create an adapter for the application `name`.
    pub fn new(name: impl Into<String>, config: CommandAdapterConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Self {
            name: name.into(),
            config,
            timeout,
        }
    }

    /// Override the per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, operation: &'static str, script: &str) -> AdapterResult<Output> {
        debug!(app = %self.name, operation, command = %script, "Running adapter command");

        let mut command = shell_command(script);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn()?;

        // The child is killed on drop when the timeout fires
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AdapterError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl SaveAdapter for CommandSaveAdapter {
    async fn is_running(&self) -> bool {
        let Some(probe) = &self.config.running else {
            return true;
        };

        match self.run("running", probe).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!(app = %self.name, "Liveness probe failed: {}", e);
                false
            }
        }
    }

    async fn list_open_files(&self) -> AdapterResult<HashSet<PathBuf>> {
        let Some(list) = &self.config.list_files else {
            return Ok(self.config.files.iter().cloned().collect());
        };

        let output = self.run("list_files", list).await?;
        if !output.status.success() {
            return Err(AdapterError::failed(format!(
                "list_files exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    async fn save(&self, path: &Path) -> AdapterResult<()> {
        let script = self.config.save.replace("{path}", &quote_path(path));
        let output = self.run("save", &script).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(AdapterError::failed(format!(
                "save exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[cfg(unix)]
fn shell_command(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

#[cfg(windows)]
fn shell_command(script: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(script);
    cmd
}

#[cfg(unix)]
fn quote_path(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

#[cfg(windows)]
fn quote_path(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn adapter(config: CommandAdapterConfig) -> CommandSaveAdapter {
        CommandSaveAdapter::new("Editor", config)
    }

    #[test]
    fn test_quote_path_escapes_single_quotes() {
        assert_eq!(quote_path(Path::new("/docs/it's.txt")), r"'/docs/it'\''s.txt'");
    }

    #[tokio::test]
    async fn test_liveness_probe() {
        let always = adapter(CommandAdapterConfig::default());
        assert!(always.is_running().await);

        let up = adapter(CommandAdapterConfig {
            running: Some("true".to_string()),
            ..Default::default()
        });
        assert!(up.is_running().await);

        let down = adapter(CommandAdapterConfig {
            running: Some("exit 1".to_string()),
            ..Default::default()
        });
        assert!(!down.is_running().await);
    }

    #[tokio::test]
    async fn test_list_files_from_command_output() {
        let listing = adapter(CommandAdapterConfig {
            list_files: Some(r"printf '/docs/a.txt\n\n  /docs/b.txt \n'".to_string()),
            ..Default::default()
        });
        let files = listing.list_open_files().await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.contains(Path::new("/docs/a.txt")));
        assert!(files.contains(Path::new("/docs/b.txt")));
    }

    #[tokio::test]
    async fn test_list_files_falls_back_to_fixed_set() {
        let fixed = adapter(CommandAdapterConfig {
            files: vec![PathBuf::from("/docs/a.txt")],
            ..Default::default()
        });
        let files = fixed.list_open_files().await.unwrap();
        assert_eq!(files, HashSet::from([PathBuf::from("/docs/a.txt")]));
    }

    #[tokio::test]
    async fn test_save_substitutes_path() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("my file.txt");

        let saving = adapter(CommandAdapterConfig {
            save: "printf saved > {path}".to_string(),
            ..Default::default()
        });
        saving.save(&target).await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "saved");
    }

    #[tokio::test]
    async fn test_save_failure() {
        let failing = adapter(CommandAdapterConfig {
            save: "echo nope >&2; exit 3".to_string(),
            ..Default::default()
        });
        let err = failing.save(Path::new("/docs/a.txt")).await.unwrap_err();
        assert!(matches!(err, AdapterError::Failed(ref msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn test_save_timeout() {
        let slow = adapter(CommandAdapterConfig {
            save: "sleep 5".to_string(),
            ..Default::default()
        })
        .with_timeout(Duration::from_millis(100));

        let err = slow.save(Path::new("/docs/a.txt")).await.unwrap_err();
        assert!(matches!(err, AdapterError::Timeout { operation: "save", .. }));
    }
}
