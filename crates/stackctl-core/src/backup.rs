//! Point-in-time snapshots of the stack's persistent directories.
//!
//! Layout under the backup root:
//!
//! ```text
//! backups/
//!   20240309_070501/
//!     manifest.json
//!     data/...
//!     models/...
//! ```
//!
//! A snapshot is assembled in a hidden `.<id>.partial` sibling and renamed
//! into place, so a listed snapshot is always complete. Restore verifies the
//! manifest, stops the stack, stages every directory next to its live
//! counterpart, and only then swaps them in.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, Instrument};

use crate::config::StackConfig;
use crate::domain::{
    snapshot_id_at, validate_snapshot_id, BackupSnapshot, Result, SnapshotManifest,
    SnapshotSummary, StackError, MANIFEST_FILE,
};
use crate::lifecycle::ServiceStopper;
use crate::obs;

/// Creates, lists, verifies and restores snapshots.
#[derive(Debug, Clone)]
pub struct BackupManager {
    project: String,
    project_dir: PathBuf,
    root: PathBuf,
    default_dirs: Vec<String>,
}

impl BackupManager {
    pub fn new(config: &StackConfig) -> Self {
        Self {
            project: config.project_name.clone(),
            project_dir: config.project_dir.clone(),
            root: config.backup_root_path(),
            default_dirs: config.backup_dirs.clone(),
        }
    }

    /// Directory holding all snapshots.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a snapshot, whether or not it exists.
    pub fn snapshot_path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Snapshot the configured directories.
    pub fn snapshot(&self) -> Result<BackupSnapshot> {
        let dirs = self.default_dirs.clone();
        self.snapshot_dirs(&dirs)
    }

    /// Snapshot `dirs` (top-level names under the project root) now.
    pub fn snapshot_dirs(&self, dirs: &[String]) -> Result<BackupSnapshot> {
        self.snapshot_at(dirs, Local::now())
    }

    /// Snapshot `dirs` under the id derived from `now`.
    pub fn snapshot_at(&self, dirs: &[String], now: DateTime<Local>) -> Result<BackupSnapshot> {
        let id = snapshot_id_at(now);
        let _span = obs::OperationSpan::enter("backup", &self.project);

        let root = resolve_existing(&self.root);
        for dir in dirs {
            check_dir_name(dir)?;
            if root.starts_with(resolve_existing(&self.project_dir.join(dir))) {
                return Err(StackError::BackupRootInside {
                    dir: dir.clone(),
                    root: self.root.clone(),
                });
            }
        }
        let dest = self.snapshot_path(&id);
        if dest.exists() {
            return Err(StackError::SnapshotExists(id));
        }

        let present: Vec<&String> = dirs
            .iter()
            .filter(|dir| {
                let exists = self.project_dir.join(dir.as_str()).is_dir();
                if !exists {
                    obs::emit_snapshot_skipped(&id, dir);
                }
                exists
            })
            .collect();
        if present.is_empty() {
            return Err(StackError::BackupTargetMissing {
                root: self.project_dir.clone(),
                dirs: dirs.to_vec(),
            });
        }

        fs::create_dir_all(&self.root)?;
        let partial = self.root.join(format!(".{id}.partial"));
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }

        let written = self.write_snapshot(&id, now, &present, &partial);
        let manifest = match written {
            Ok(manifest) => manifest,
            Err(err) => {
                let _ = fs::remove_dir_all(&partial);
                return Err(err);
            }
        };
        fs::rename(&partial, &dest)?;

        let source_dirs: BTreeSet<PathBuf> = present
            .iter()
            .map(|dir| self.project_dir.join(dir.as_str()))
            .collect();
        obs::emit_snapshot_created(&id, &manifest.directories, manifest.files.len());
        Ok(BackupSnapshot::new(id, source_dirs, dest, manifest))
    }

    fn write_snapshot(
        &self,
        id: &str,
        now: DateTime<Local>,
        present: &[&String],
        partial: &Path,
    ) -> Result<SnapshotManifest> {
        fs::create_dir_all(partial)?;
        let mut files = BTreeMap::new();
        for dir in present {
            let source = self.project_dir.join(dir.as_str());
            let target = partial.join(dir.as_str());
            copy_tree(&source, &target)?;
            digest_tree(&target, Path::new(dir.as_str()), &mut files)?;
            debug!(snapshot = %id, directory = %dir, "directory copied");
        }

        let manifest = SnapshotManifest {
            id: id.to_string(),
            created_at: now.with_timezone(&Utc),
            directories: present.iter().map(|d| d.to_string()).collect(),
            files,
        };
        fs::write(
            partial.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;
        Ok(manifest)
    }

    /// Snapshots under the root, oldest first.
    pub fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_snapshot_id(&id).is_err() {
                continue;
            }
            let summary = match read_manifest(&entry.path())? {
                Some(manifest) => SnapshotSummary {
                    id,
                    directories: manifest.directories,
                    file_count: Some(manifest.files.len()),
                },
                None => SnapshotSummary {
                    id,
                    directories: subdirectories(&entry.path())?,
                    file_count: None,
                },
            };
            summaries.push(summary);
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    /// Check a snapshot's contents against its manifest.
    ///
    /// Returns the directories the snapshot holds. Snapshots without a
    /// manifest are accepted as-is.
    pub fn verify(&self, id: &str) -> Result<Vec<String>> {
        let path = self.existing_snapshot(id)?;
        let Some(manifest) = read_manifest(&path)? else {
            return subdirectories(&path);
        };

        if manifest.id != id {
            return Err(StackError::SnapshotCorrupt {
                id: id.to_string(),
                detail: format!("manifest names snapshot {}", manifest.id),
            });
        }

        let mut actual = BTreeMap::new();
        for dir in &manifest.directories {
            check_dir_name(dir)?;
            let captured = path.join(dir);
            if !captured.is_dir() {
                return Err(StackError::SnapshotCorrupt {
                    id: id.to_string(),
                    detail: format!("directory {dir} is missing"),
                });
            }
            digest_tree(&captured, Path::new(dir), &mut actual)?;
        }

        if let Some(detail) = first_difference(&manifest.files, &actual) {
            return Err(StackError::SnapshotCorrupt {
                id: id.to_string(),
                detail,
            });
        }
        Ok(manifest.directories)
    }

    /// Replace live directories with the contents of snapshot `id`.
    ///
    /// Nothing is stopped or touched unless the snapshot exists and verifies.
    /// Directories the snapshot does not hold are left alone.
    pub async fn restore<S>(&self, id: &str, stopper: &mut S) -> Result<Vec<String>>
    where
        S: ServiceStopper + ?Sized,
    {
        let span = obs::operation_span("restore", &self.project);
        self.restore_inner(id, stopper).instrument(span).await
    }

    async fn restore_inner<S>(&self, id: &str, stopper: &mut S) -> Result<Vec<String>>
    where
        S: ServiceStopper + ?Sized,
    {
        let dirs = self.verify(id)?;
        let snapshot = self.snapshot_path(id);

        info!(snapshot = %id, "stopping services before restore");
        stopper.stop_services().await?;

        let mut staged: Vec<(String, PathBuf)> = Vec::with_capacity(dirs.len());
        for dir in &dirs {
            let staging = self.project_dir.join(format!(".{dir}.restore-{id}"));
            remove_path(&staging)?;
            if let Err(err) = copy_tree(&snapshot.join(dir), &staging) {
                let _ = remove_path(&staging);
                for (_, earlier) in &staged {
                    let _ = remove_path(earlier);
                }
                return Err(err);
            }
            staged.push((dir.clone(), staging));
        }

        swap_staged(&self.project_dir, &staged, swap_in)?;
        for dir in &dirs {
            debug!(snapshot = %id, directory = %dir, "directory restored");
        }

        obs::emit_restore_completed(id, &dirs);
        Ok(dirs)
    }

    fn existing_snapshot(&self, id: &str) -> Result<PathBuf> {
        validate_snapshot_id(id)?;
        let path = self.snapshot_path(id);
        if !path.is_dir() {
            return Err(StackError::RestoreSourceMissing {
                id: id.to_string(),
                path,
            });
        }
        Ok(path)
    }
}

/// A backup directory must be one plain path component.
fn check_dir_name(dir: &str) -> Result<()> {
    let mut components = Path::new(dir).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name != MANIFEST_FILE => Ok(()),
        _ => Err(StackError::InvalidBackupDir(dir.to_string())),
    }
}

/// `path` with symlinks, `.` and `..` resolved for the part that exists.
fn resolve_existing(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = fs::canonicalize(existing) {
            return missing.iter().rev().fold(real, |acc, part| acc.join(part));
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Move every staged copy over its live directory.
///
/// On failure the staged copies not yet swapped in are removed.
fn swap_staged<F>(project_dir: &Path, staged: &[(String, PathBuf)], mut swap: F) -> Result<()>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    for (index, (dir, staging)) in staged.iter().enumerate() {
        if let Err(err) = swap(staging, &project_dir.join(dir)) {
            for (_, pending) in &staged[index..] {
                let _ = remove_path(pending);
            }
            return Err(err.into());
        }
    }
    Ok(())
}

fn swap_in(staging: &Path, live: &Path) -> io::Result<()> {
    remove_path(live)?;
    fs::rename(staging, live)
}

fn read_manifest(snapshot: &Path) -> Result<Option<SnapshotManifest>> {
    match fs::read(snapshot.join(MANIFEST_FILE)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn subdirectories(path: &Path) -> Result<Vec<String>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                dirs.push(name.to_string());
            }
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Recursive copy. Symlinks are recreated, not followed.
fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

/// Add `relative/<path>` to SHA-256 hex entries for everything under `dir`.
fn digest_tree(dir: &Path, relative: &Path, out: &mut BTreeMap<String, String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = relative.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            digest_tree(&path, &rel, out)?;
            continue;
        }

        let mut hasher = Sha256::new();
        if file_type.is_symlink() {
            hasher.update(b"symlink:");
            hasher.update(fs::read_link(&path)?.to_string_lossy().as_bytes());
        } else {
            let mut file = fs::File::open(&path)?;
            io::copy(&mut file, &mut hasher)?;
        }
        out.insert(manifest_key(&rel), hex::encode(hasher.finalize()));
    }
    Ok(())
}

fn manifest_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn first_difference(
    expected: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
) -> Option<String> {
    for (path, digest) in expected {
        match actual.get(path) {
            None => return Some(format!("{path} is missing")),
            Some(found) if found != digest => return Some(format!("{path} digest mismatch")),
            Some(_) => {}
        }
    }
    actual
        .keys()
        .find(|path| !expected.contains_key(*path))
        .map(|path| format!("{path} is not in the manifest"))
}
