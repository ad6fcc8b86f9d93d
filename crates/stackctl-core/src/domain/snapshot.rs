//! Backup snapshot records.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Result, StackError};

/// `strftime` layout of snapshot ids (second resolution).
pub const SNAPSHOT_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Name of the manifest written at the root of every snapshot.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Derive a snapshot id from a local timestamp.
pub fn snapshot_id_at(now: DateTime<Local>) -> String {
    now.format(SNAPSHOT_ID_FORMAT).to_string()
}

/// Reject anything that is not a `YYYYMMDD_HHMMSS` timestamp.
///
/// Ids become path components, so this also keeps restore inside the
/// backup root.
pub fn validate_snapshot_id(id: &str) -> Result<()> {
    NaiveDateTime::parse_from_str(id, SNAPSHOT_ID_FORMAT)
        .ok()
        .filter(|_| id.len() == 15)
        .map(|_| ())
        .ok_or_else(|| StackError::InvalidSnapshotId(id.to_string()))
}

/// Content record written alongside the copied directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Top-level directory names captured.
    pub directories: Vec<String>,
    /// Relative path (`data/train.jsonl`) to SHA-256 hex digest.
    pub files: BTreeMap<String, String>,
}

/// A written snapshot. Created only by the backup manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    id: String,
    source_dirs: BTreeSet<PathBuf>,
    dest_path: PathBuf,
    manifest: SnapshotManifest,
}

impl BackupSnapshot {
    pub(crate) fn new(
        id: String,
        source_dirs: BTreeSet<PathBuf>,
        dest_path: PathBuf,
        manifest: SnapshotManifest,
    ) -> Self {
        Self {
            id,
            source_dirs,
            dest_path,
            manifest,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Live directories that were copied (missing ones are not listed).
    pub fn source_dirs(&self) -> &BTreeSet<PathBuf> {
        &self.source_dirs
    }

    pub fn dest_path(&self) -> &Path {
        &self.dest_path
    }

    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }

    pub fn file_count(&self) -> usize {
        self.manifest.files.len()
    }
}

/// One line of `stackctl backups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub directories: Vec<String>,
    /// `None` when the snapshot predates manifests.
    pub file_count: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_id_has_second_resolution() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(snapshot_id_at(at), "20240309_070501");
    }

    #[test]
    fn validate_accepts_timestamp_ids() {
        assert!(validate_snapshot_id("19700101_000000").is_ok());
        assert!(validate_snapshot_id("20241231_235959").is_ok());
    }

    #[test]
    fn validate_rejects_paths_and_garbage() {
        for bad in ["../etc", "latest", "2024-01-01", "20241301_000000", "20240101_000000/.."] {
            assert!(
                matches!(validate_snapshot_id(bad), Err(StackError::InvalidSnapshotId(_))),
                "{bad} should be rejected"
            );
        }
    }
}
