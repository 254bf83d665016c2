//! Platform directories.

use std::path::PathBuf;

/// Get the autosave configuration directory.
///
/// On unix `~/.config/autosave` is preferred when it exists, matching what
/// most CLI tools do; otherwise the platform config directory is used.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        if let Some(home) = dirs::home_dir() {
            let xdg_config = home.join(".config").join("autosave");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }
    }

    dirs::config_dir().map(|p| p.join("autosave"))
}

/// Get the autosave data directory (`~/.local/share/autosave` on Linux).
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("autosave"))
}

/// Default root of the snapshot archive.
pub fn default_archive_dir() -> Option<PathBuf> {
    data_dir().map(|p| p.join("archive"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_dir_under_data_dir() {
        if let (Some(data), Some(archive)) = (data_dir(), default_archive_dir()) {
            assert!(archive.starts_with(&data));
            assert!(archive.ends_with("archive"));
        }
    }

    #[test]
    fn test_config_dir_named_after_app() {
        if let Some(dir) = config_dir() {
            assert!(dir.ends_with("autosave"));
        }
    }
}
