//! PatchApplier: writes an Implementation to disk, one file at a time.
//!
//! Every file goes through read → backup → transform → write → commit →
//! post-validate. A file that fails at any step is restored from the
//! content read in the first step and the run moves on to the next file.
//! Backups land in the [`BackupStore`] before the real file is touched, so
//! an interrupted run can always be undone with [`PatchApplier::recover`].

use crate::validator::{FsSources, PatchValidator};
use mend_adapters::backup::{BackupError, BackupStore};
use mend_adapters::config::ApplyDefaults;
use mend_adapters::fs_util::{resolve_within, write_atomic, PathError};
use mend_core::parser::check_syntax;
use mend_core::transform::apply_changes;
use mend_core::{
    ApplyResult, ApplyStatus, BackupRecord, Change, FileFailure, FileModification,
    Implementation, Language, Patch, RollbackResult, RollbackStatus, TransformError,
};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};


/// Per-call switches of [`PatchApplier::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Compute and classify everything, touch nothing
    pub dry_run: bool,
    /// Re-check files written so far after each file
    pub progressive: bool,
    /// Re-parse every written file and restore it when it no longer parses
    pub validate_after_each_file: bool,
    /// Validate the whole implementation before any file is touched
    pub validate_patches: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyDefaults::default().into()
    }
}

impl From<ApplyDefaults> for ApplyOptions {
    fn from(defaults: ApplyDefaults) -> Self {
        Self {
            dry_run: defaults.dry_run,
            progressive: defaults.progressive,
            validate_after_each_file: defaults.validate_after_each_file,
            validate_patches: defaults.validate_patches,
        }
    }
}

/// Why a single file could not be applied or restored.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("file not found: {0}")]
    Missing(String),
    #[error("refusing to touch {0}: path leaves the working directory")]
    UnsafePath(String),
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {source}")]
    Transform {
        path: String,
        #[source]
        source: TransformError,
    },
    #[error("syntax error in {path} after applying changes: {reason}")]
    Syntax { path: String, reason: String },
    #[error(transparent)]
    Backup(#[from] BackupError),
}

/// A successfully applied implementation, kept for rollback.
#[derive(Debug, Clone)]
pub struct AppliedImplementation {
    pub implementation: Implementation,
    pub result: ApplyResult,
}

/// All changes an implementation makes to one file.
#[derive(Debug, Clone)]
struct FileWork {
    file_path: String,
    changes: Vec<Change>,
}

pub struct PatchApplier {
    base_dir: PathBuf,
    backups: BackupStore,
    validator: PatchValidator,
    history: Vec<ApplyResult>,
    successful_implementations: HashMap<String, AppliedImplementation>,
    rollback_history: Vec<RollbackResult>,
    rollback_count: usize,
}

impl PatchApplier {
    /// Relative patch paths resolve against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, backups: BackupStore) -> Self {
        Self {
            base_dir: base_dir.into(),
            backups,
            validator: PatchValidator::new(),
            history: Vec::new(),
            successful_implementations: HashMap::new(),
            rollback_history: Vec::new(),
            rollback_count: 0,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Every apply attempt, oldest first.
    pub fn history(&self) -> &[ApplyResult] {
        &self.history
    }

    pub fn rollback_history(&self) -> &[RollbackResult] {
        &self.rollback_history
    }

    pub fn rollback_count(&self) -> usize {
        self.rollback_count
    }

    pub fn successful_implementation(
        &self,
        implementation_id: &str,
    ) -> Option<&AppliedImplementation> {
        self.successful_implementations.get(implementation_id)
    }

    /// Apply every patch of `implementation`.
    ///
    /// Never returns an error: per-file problems end up in `files_failed`,
    /// a failed up-front validation in `status = ValidationFailed`.
    ///
    /// Applies are not coordinated with each other. Two applies touching
    /// the same file, from this applier or another process, can interleave
    /// and the later write wins.
    pub fn apply(&mut self, implementation: &Implementation, options: ApplyOptions) -> ApplyResult {
        let id = implementation.implementation_id.as_str();
        let mut result = ApplyResult::new(id, options.dry_run);

        if implementation.patches.is_empty() {
            info!("{}: nothing to apply", id);
            return self.finish(result);
        }

        let sources = FsSources::new(&self.base_dir);
        if options.validate_patches {
            let validation = self.validator.validate(implementation, &sources);
            let passed = validation.success;
            if !passed {
                warn!(
                    "{}: validation failed, no files touched: {}",
                    id,
                    validation.errors.join("; ")
                );
            }
            result.validation_results.push(validation);
            if !passed {
                result.status = ApplyStatus::ValidationFailed;
                return self.finish(result);
            }
        }

        let work = merge_by_file(&implementation.patches);
        if !options.dry_run {
            if let Err(err) = self.backups.begin(id) {
                warn!("{}: cannot prepare backups: {}", id, err);
                result.files_failed.extend(work.iter().map(|unit| FileFailure {
                    file_path: unit.file_path.clone(),
                    reason: err.to_string(),
                }));
                result.status = ApplyStatus::Failed;
                return self.finish(result);
            }
            // its backups are gone, so an earlier success can no longer be rolled back
            self.successful_implementations.remove(id);
        }
        let mut written: Vec<String> = Vec::new();
        for (idx, unit) in work.iter().enumerate() {
            match self.apply_file(id, unit, options, &mut result) {
                Ok(()) => {
                    result.files_modified.push(FileModification {
                        file_path: unit.file_path.clone(),
                        changes_applied: unit.changes.len(),
                    });
                    if !options.dry_run {
                        written.push(unit.file_path.clone());
                    }
                }
                Err(err) => {
                    warn!("{}: {} failed: {}", id, unit.file_path, err);
                    result.files_failed.push(FileFailure {
                        file_path: unit.file_path.clone(),
                        reason: err.to_string(),
                    });
                }
            }

            let is_last = idx + 1 == work.len();
            if options.progressive && !options.dry_run && !is_last && !written.is_empty() {
                let pending: Vec<String> =
                    work[idx + 1..].iter().map(|w| w.file_path.clone()).collect();
                let progress = self.validator.check_progress(&written, &pending, &sources);
                if !progress.success {
                    debug!(
                        "{}: progressive check flagged {} issue(s)",
                        id,
                        progress.errors.len()
                    );
                    result.warnings.extend(
                        progress
                            .errors
                            .iter()
                            .map(|e| format!("progressive validation: {}", e)),
                    );
                    result.validation_results.push(progress);
                }
            }
        }

        result.status = ApplyStatus::derive(
            true,
            result.files_modified.len(),
            result.files_failed.len(),
        );
        info!(
            "{}: {:?} ({} modified, {} failed{})",
            id,
            result.status,
            result.files_modified.len(),
            result.files_failed.len(),
            if options.dry_run { ", dry run" } else { "" }
        );

        if result.is_success() && !options.dry_run {
            self.successful_implementations.insert(
                id.to_string(),
                AppliedImplementation {
                    implementation: implementation.clone(),
                    result: result.clone(),
                },
            );
        }
        self.finish(result)
    }

    fn finish(&mut self, result: ApplyResult) -> ApplyResult {
        self.history.push(result.clone());
        result
    }

    fn apply_file(
        &self,
        id: &str,
        unit: &FileWork,
        options: ApplyOptions,
        result: &mut ApplyResult,
    ) -> Result<(), ApplyError> {
        let path = self.resolve(&unit.file_path)?;
        let original = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ApplyError::Missing(unit.file_path.clone()));
            }
            Err(source) => {
                return Err(ApplyError::Read {
                    path: unit.file_path.clone(),
                    source,
                })
            }
        };

        let updated =
            apply_changes(&original, &unit.changes).map_err(|source| ApplyError::Transform {
                path: unit.file_path.clone(),
                source,
            })?;

        if options.dry_run {
            if options.validate_after_each_file {
                syntax_check(&unit.file_path, &updated)?;
            }
            debug!("{}: dry run, {} left untouched", id, unit.file_path);
            return Ok(());
        }

        let record = self.backups.snapshot(id, &path, original.as_bytes())?;
        debug!("{}: backed up {} to {}", id, unit.file_path, record.backup_path.display());
        result.backups_created.push(record);

        write_atomic(&path, updated.as_bytes()).map_err(|source| ApplyError::Write {
            path: unit.file_path.clone(),
            source,
        })?;
        debug!("{}: wrote {}", id, unit.file_path);

        let after_write = self
            .backups
            .commit(id, &path)
            .map_err(ApplyError::from)
            .and_then(|()| {
                if !options.validate_after_each_file {
                    return Ok(());
                }
                let on_disk = fs::read_to_string(&path).map_err(|source| ApplyError::Read {
                    path: unit.file_path.clone(),
                    source,
                })?;
                syntax_check(&unit.file_path, &on_disk)
            });

        if let Err(err) = after_write {
            self.restore(&path, &unit.file_path, &original);
            return Err(err);
        }
        Ok(())
    }

    /// Put the pre-change content back after a failed step.
    fn restore(&self, path: &Path, file_path: &str, original: &str) {
        match write_atomic(path, original.as_bytes()) {
            Ok(()) => info!("restored {} to its original content", file_path),
            Err(err) => warn!("could not restore {}: {}", file_path, err),
        }
    }

    /// Relative paths without `..`, or absolute paths inside `base_dir`.
    fn resolve(&self, file_path: &str) -> Result<PathBuf, ApplyError> {
        resolve_within(&self.base_dir, file_path).map_err(|err| match err {
            PathError::Escapes => ApplyError::UnsafePath(file_path.to_string()),
            PathError::Io(source) if source.kind() == io::ErrorKind::NotFound => {
                ApplyError::Missing(file_path.to_string())
            }
            PathError::Io(source) => ApplyError::Read {
                path: file_path.to_string(),
                source,
            },
        })
    }

    /// Restore every file backed up by a successful apply in this session.
    pub fn rollback(&mut self, implementation_id: &str) -> RollbackResult {
        let Some(applied) = self.successful_implementations.get(implementation_id) else {
            info!("{}: nothing to roll back", implementation_id);
            let result = RollbackResult::not_found(implementation_id);
            self.rollback_history.push(result.clone());
            return result;
        };

        let records = applied.result.backups_created.clone();
        let result = self.restore_records(implementation_id, &records);
        self.finish_rollback(result)
    }

    /// Restore every file listed in the on-disk backup manifest.
    ///
    /// Works without any in-memory state, e.g. after a crash or from a
    /// later process.
    pub fn recover(&mut self, implementation_id: &str) -> RollbackResult {
        let manifest = match self.backups.load_manifest(implementation_id) {
            Ok(manifest) => manifest,
            Err(BackupError::NotFound(_)) => {
                let result = RollbackResult::not_found(implementation_id);
                self.rollback_history.push(result.clone());
                return result;
            }
            Err(err) => {
                warn!("{}: unreadable backup manifest: {}", implementation_id, err);
                let result = RollbackResult {
                    implementation_id: implementation_id.to_string(),
                    status: RollbackStatus::Failed,
                    files_restored: Vec::new(),
                    files_failed: vec![FileFailure {
                        file_path: self
                            .backups
                            .implementation_dir(implementation_id)
                            .display()
                            .to_string(),
                        reason: err.to_string(),
                    }],
                };
                self.rollback_history.push(result.clone());
                return result;
            }
        };

        let records: Vec<BackupRecord> = manifest.entries.iter().map(|e| e.record()).collect();
        let result = self.restore_records(implementation_id, &records);
        self.finish_rollback(result)
    }

    fn restore_records(&self, implementation_id: &str, records: &[BackupRecord]) -> RollbackResult {
        let mut result = RollbackResult {
            implementation_id: implementation_id.to_string(),
            status: RollbackStatus::Success,
            files_restored: Vec::new(),
            files_failed: Vec::new(),
        };

        for record in records {
            let label = self.display_path(&record.original_file);
            let restored = self
                .backups
                .read(&record.backup_path)
                .map_err(ApplyError::from)
                .and_then(|content| {
                    write_atomic(&record.original_file, &content).map_err(|source| {
                        ApplyError::Write {
                            path: label.clone(),
                            source,
                        }
                    })
                });
            match restored {
                Ok(()) => {
                    debug!("{}: restored {}", implementation_id, label);
                    result.files_restored.push(label);
                }
                Err(err) => {
                    warn!("{}: could not restore {}: {}", implementation_id, label, err);
                    result.files_failed.push(FileFailure {
                        file_path: label,
                        reason: err.to_string(),
                    });
                }
            }
        }

        result.status = match (result.files_restored.is_empty(), result.files_failed.is_empty()) {
            (_, true) => RollbackStatus::Success,
            (false, false) => RollbackStatus::PartialSuccess,
            (true, false) => RollbackStatus::Failed,
        };
        result
    }

    fn finish_rollback(&mut self, result: RollbackResult) -> RollbackResult {
        if result.status == RollbackStatus::Success {
            self.successful_implementations.remove(&result.implementation_id);
            self.rollback_count += 1;
        }
        info!(
            "{}: rollback {:?} ({} restored, {} failed)",
            result.implementation_id,
            result.status,
            result.files_restored.len(),
            result.files_failed.len()
        );
        self.rollback_history.push(result.clone());
        result
    }

    /// Path relative to `base_dir` when possible.
    fn display_path(&self, path: &Path) -> String {
        let canonical_base = fs::canonicalize(&self.base_dir).ok();
        path.strip_prefix(&self.base_dir)
            .ok()
            .or_else(|| canonical_base.as_deref().and_then(|b| path.strip_prefix(b).ok()))
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

fn syntax_check(file_path: &str, content: &str) -> Result<(), ApplyError> {
    check_syntax(content, Language::from_path(file_path), Some(Path::new(file_path))).map_err(
        |reason| ApplyError::Syntax {
            path: file_path.to_string(),
            reason,
        },
    )
}

/// One unit of work per file, in path order.
///
/// Each file is backed up and written once even when several patches
/// target it.
fn merge_by_file(patches: &[Patch]) -> Vec<FileWork> {
    let mut merged: BTreeMap<&str, Vec<Change>> = BTreeMap::new();
    for patch in patches {
        merged
            .entry(patch.file_path.as_str())
            .or_default()
            .extend(patch.changes.iter().cloned());
    }
    merged
        .into_iter()
        .map(|(file_path, changes)| FileWork {
            file_path: file_path.to_string(),
            changes,
        })
        .collect()
}
