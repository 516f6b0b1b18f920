//! On-disk backup store that doubles as the undo log.
//!
//! Layout: `<root>/<implementation_id>/<basename>.bak` plus a
//! `manifest.json` listing every snapshot. A snapshot is written and
//! recorded uncommitted before the real file is touched; `commit` marks it
//! once the real write happened. Each apply attempt calls `begin` first, so
//! the manifest describes that attempt only.

use crate::fs_util::write_atomic;
use chrono::{DateTime, Utc};
use mend_core::BackupRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid backup manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },
    #[error("no backup manifest for implementation {0}")]
    NotFound(String),
    #[error("{0} has no snapshot in implementation {1}")]
    UnknownFile(PathBuf, String),
}

impl BackupError {
    fn io(path: &Path, source: io::Error) -> Self {
        BackupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub original_file: PathBuf,
    pub backup_path: PathBuf,
    /// Set once the real file was overwritten
    pub committed: bool,
    pub created_at: DateTime<Utc>,
}

impl ManifestEntry {
    pub fn record(&self) -> BackupRecord {
        BackupRecord {
            original_file: self.original_file.clone(),
            backup_path: self.backup_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub implementation_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn implementation_dir(&self, implementation_id: &str) -> PathBuf {
        self.root.join(implementation_id)
    }

    fn manifest_path(&self, implementation_id: &str) -> PathBuf {
        self.implementation_dir(implementation_id).join(MANIFEST_FILE)
    }

    /// Start a fresh manifest for one apply attempt.
    ///
    /// Snapshots left by an earlier attempt with the same id are removed, so
    /// the manifest only ever describes the latest attempt.
    pub fn begin(&self, implementation_id: &str) -> Result<(), BackupError> {
        let dir = self.implementation_dir(implementation_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("discarded earlier backups of {}", implementation_id);
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackupError::io(&dir, err)),
        }
    }

    /// Phase one: persist `content` as the pre-change snapshot of `original`.
    ///
    /// Snapshotting a file again replaces its earlier backup.
    pub fn snapshot(
        &self,
        implementation_id: &str,
        original: &Path,
        content: &[u8],
    ) -> Result<BackupRecord, BackupError> {
        let dir = self.implementation_dir(implementation_id);
        fs::create_dir_all(&dir).map_err(|e| BackupError::io(&dir, e))?;

        let mut manifest = match self.load_manifest(implementation_id) {
            Ok(manifest) => manifest,
            Err(BackupError::NotFound(_)) => BackupManifest {
                implementation_id: implementation_id.to_string(),
                created_at: Utc::now(),
                entries: Vec::new(),
            },
            Err(err) => return Err(err),
        };

        let previous = manifest
            .entries
            .iter()
            .position(|e| e.original_file == original)
            .map(|idx| manifest.entries.remove(idx));
        let backup_path = match previous {
            Some(entry) => {
                debug!("replacing snapshot of {}", original.display());
                entry.backup_path
            }
            None => unique_backup_path(&dir, original, &manifest),
        };
        write_atomic(&backup_path, content).map_err(|e| BackupError::io(&backup_path, e))?;

        let entry = ManifestEntry {
            original_file: original.to_path_buf(),
            backup_path: backup_path.clone(),
            committed: false,
            created_at: Utc::now(),
        };
        let record = entry.record();
        manifest.entries.push(entry);
        self.save_manifest(&manifest)?;

        debug!(
            "backed up {} to {}",
            original.display(),
            backup_path.display()
        );
        Ok(record)
    }

    /// Phase two: mark the snapshot of `original` as covering a real write.
    pub fn commit(&self, implementation_id: &str, original: &Path) -> Result<(), BackupError> {
        let mut manifest = self.load_manifest(implementation_id)?;
        let entry = manifest
            .entries
            .iter_mut()
            .find(|e| e.original_file == original)
            .ok_or_else(|| {
                BackupError::UnknownFile(original.to_path_buf(), implementation_id.to_string())
            })?;
        if entry.committed {
            return Ok(());
        }
        entry.committed = true;
        self.save_manifest(&manifest)
    }

    pub fn read(&self, backup_path: &Path) -> Result<Vec<u8>, BackupError> {
        fs::read(backup_path).map_err(|e| BackupError::io(backup_path, e))
    }

    pub fn load_manifest(&self, implementation_id: &str) -> Result<BackupManifest, BackupError> {
        let path = self.manifest_path(implementation_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(implementation_id.to_string()));
            }
            Err(err) => return Err(BackupError::io(&path, err)),
        };
        serde_json::from_str(&content).map_err(|e| BackupError::Manifest {
            path,
            message: e.to_string(),
        })
    }

    fn save_manifest(&self, manifest: &BackupManifest) -> Result<(), BackupError> {
        let path = self.manifest_path(&manifest.implementation_id);
        let content = serde_json::to_vec_pretty(manifest).map_err(|e| BackupError::Manifest {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&path, &content).map_err(|e| BackupError::io(&path, e))
    }

    /// Implementation ids that have a manifest on disk, sorted.
    pub fn implementations(&self) -> Result<Vec<String>, BackupError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BackupError::io(&self.root, err)),
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(MANIFEST_FILE).is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        ids.sort();
        info!("found {} backed-up implementation(s)", ids.len());
        Ok(ids)
    }
}

/// `<basename>.bak`, or `<basename>.N.bak` when another file already took it.
fn unique_backup_path(dir: &Path, original: &Path, manifest: &BackupManifest) -> PathBuf {
    let basename = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let taken = |candidate: &Path| {
        manifest.entries.iter().any(|e| e.backup_path == candidate) || candidate.exists()
    };

    let first = dir.join(format!("{}.bak", basename));
    if !taken(&first) {
        return first;
    }
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{}.{}.bak", basename, n));
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_then_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"));
        let original = dir.path().join("app.py");

        let record = store.snapshot("impl_abc", &original, b"x = 1\n").unwrap();
        assert_eq!(record.backup_path, dir.path().join("backups/impl_abc/app.py.bak"));
        assert_eq!(store.read(&record.backup_path).unwrap(), b"x = 1\n");
        assert!(!store.load_manifest("impl_abc").unwrap().entries[0].committed);

        store.commit("impl_abc", &original).unwrap();
        assert!(store.load_manifest("impl_abc").unwrap().entries[0].committed);
    }

    #[test]
    fn test_basename_collision_gets_numbered_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let a = store
            .snapshot("impl_1", Path::new("/src/a/util.py"), b"a")
            .unwrap();
        let b = store
            .snapshot("impl_1", Path::new("/src/b/util.py"), b"b")
            .unwrap();
        assert!(a.backup_path.ends_with("util.py.bak"));
        assert!(b.backup_path.ends_with("util.py.1.bak"));
        assert_eq!(store.read(&b.backup_path).unwrap(), b"b");
    }

    #[test]
    fn test_snapshot_again_replaces_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let original = Path::new("/src/a.py");
        let first = store.snapshot("impl_1", original, b"before").unwrap();
        let again = store.snapshot("impl_1", original, b"after").unwrap();
        assert_eq!(again.backup_path, first.backup_path);
        assert_eq!(store.read(&again.backup_path).unwrap(), b"after");
        let manifest = store.load_manifest("impl_1").unwrap();
        assert_eq!(manifest.entries.len(), 1);
        assert!(!manifest.entries[0].committed);
    }

    #[test]
    fn test_begin_discards_earlier_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"));
        let old = store.snapshot("impl_1", Path::new("/src/old.py"), b"old").unwrap();
        store.commit("impl_1", Path::new("/src/old.py")).unwrap();

        store.begin("impl_1").unwrap();
        assert!(matches!(
            store.load_manifest("impl_1"),
            Err(BackupError::NotFound(_))
        ));
        assert!(!old.backup_path.exists());

        store.snapshot("impl_1", Path::new("/src/new.py"), b"new").unwrap();
        let manifest = store.load_manifest("impl_1").unwrap();
        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.entries[0].original_file, Path::new("/src/new.py"));

        // nothing to discard is fine
        store.begin("impl_never").unwrap();
    }

    #[test]
    fn test_missing_manifest_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("nothing-yet"));
        assert!(matches!(
            store.load_manifest("impl_x"),
            Err(BackupError::NotFound(_))
        ));
        assert!(store.implementations().unwrap().is_empty());

        store.snapshot("impl_b", Path::new("/x.py"), b"").unwrap();
        store.snapshot("impl_a", Path::new("/y.py"), b"").unwrap();
        assert_eq!(store.implementations().unwrap(), vec!["impl_a", "impl_b"]);
    }

    #[test]
    fn test_commit_unknown_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        store.snapshot("impl_1", Path::new("/a.py"), b"").unwrap();
        assert!(matches!(
            store.commit("impl_1", Path::new("/b.py")),
            Err(BackupError::UnknownFile(..))
        ));
    }
}
