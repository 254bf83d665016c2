//! Snapshot data structures and archive naming.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Format of the capture time embedded in archive names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Length of `_YYYYMMDD_HHMMSS`.
const STAMP_SUFFIX_LEN: usize = 16;

/// An archived copy of a file taken right after a successful forced save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Application namespace the copy is archived under.
    pub app_name: String,

    /// Base name of the original file (e.g. `a.txt`).
    pub file_name: String,

    /// Original path at capture time. Only known for snapshots returned by
    /// a capture; listings recover everything else from the archive name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,

    /// Local wall-clock capture time, second resolution.
    pub captured_at: NaiveDateTime,

    /// Location of the archived copy.
    pub storage_path: PathBuf,
}

impl Snapshot {
    /// File name of the archived copy.
    pub fn archive_name(&self) -> String {
        self.storage_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Check whether this snapshot was taken from `path`.
    pub fn is_from(&self, path: &Path) -> bool {
        self.source_path.as_deref() == Some(path)
    }
}

/// Split a base name into stem and extension (extension keeps its dot).
fn split_name(file_name: &str) -> (&str, &str) {
    let path = Path::new(file_name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => (stem, &file_name[file_name.len() - ext.len() - 1..]),
        (Some(stem), None) => (stem, ""),
        _ => (file_name, ""),
    }
}

/// Build the archive name `<stem>_<YYYYMMDD_HHMMSS><ext>` for a capture.
pub fn snapshot_file_name(file_name: &str, captured_at: NaiveDateTime) -> String {
    let (stem, ext) = split_name(file_name);
    format!("{stem}_{}{ext}", captured_at.format(TIMESTAMP_FORMAT))
}

fn is_stamp_shaped(stamp: &str) -> bool {
    let bytes = stamp.as_bytes();
    bytes.len() == STAMP_SUFFIX_LEN - 1
        && bytes.iter().enumerate().all(|(i, b)| match i {
            8 => *b == b'_',
            _ => b.is_ascii_digit(),
        })
}

/// Recover the original base name and capture time from an archive name.
///
/// Returns `None` when the name does not have the archive shape at all. The
/// inner option is `None` when the stamp has the right shape but is not a
/// valid date, in which case callers fall back to the file modification time.
pub fn parse_archive_name(archive_name: &str) -> Option<(String, Option<NaiveDateTime>)> {
    let (stem, ext) = split_name(archive_name);
    if stem.len() <= STAMP_SUFFIX_LEN || !stem.is_char_boundary(stem.len() - STAMP_SUFFIX_LEN) {
        return None;
    }

    let (base, suffix) = stem.split_at(stem.len() - STAMP_SUFFIX_LEN);
    let stamp = suffix.strip_prefix('_')?;
    if !is_stamp_shaped(stamp) {
        return None;
    }

    let captured_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok();
    Some((format!("{base}{ext}"), captured_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_snapshot_file_name() {
        assert_eq!(
            snapshot_file_name("a.txt", at(14, 5, 9)),
            "a_20240309_140509.txt"
        );
        assert_eq!(
            snapshot_file_name("archive.tar.gz", at(0, 0, 0)),
            "archive.tar_20240309_000000.gz"
        );
        assert_eq!(
            snapshot_file_name("Makefile", at(23, 59, 59)),
            "Makefile_20240309_235959"
        );
    }

    #[test]
    fn test_parse_archive_name() {
        let (name, stamp) = parse_archive_name("a_20240309_140509.txt").unwrap();
        assert_eq!(name, "a.txt");
        assert_eq!(stamp, Some(at(14, 5, 9)));

        let (name, _) = parse_archive_name("archive.tar_20240309_000000.gz").unwrap();
        assert_eq!(name, "archive.tar.gz");

        let (name, _) = parse_archive_name("Makefile_20240309_235959").unwrap();
        assert_eq!(name, "Makefile");
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_archive_name("a.txt").is_none());
        assert!(parse_archive_name("a_2024030_140509.txt").is_none());
        assert!(parse_archive_name("a-20240309-140509.txt").is_none());
        assert!(parse_archive_name("_20240309_140509.txt").is_none());
    }

    #[test]
    fn test_parse_keeps_invalid_dates_for_mtime_fallback() {
        let (name, stamp) = parse_archive_name("a_20241399_250000.txt").unwrap();
        assert_eq!(name, "a.txt");
        assert!(stamp.is_none());
    }

    #[test]
    fn test_similar_prefixes_are_distinct() {
        let (name, _) = parse_archive_name("ab_20240309_140509.txt").unwrap();
        assert_ne!(name, "a.txt");
    }
}
