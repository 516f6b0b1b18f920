//! Patch model shared by the generator, validator and applier.
//!
//! Line numbers are 1-based and always refer to the file as it was before
//! any change of the same patch was applied.

use crate::bug::BugKind;
use crate::language::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ReplaceLines,
    InsertLines,
    DeleteLines,
}

/// One line-level edit.
///
/// `InsertLines` inserts `content` before original line `start_line`
/// (`start_line == len + 1` appends) and ignores `end_line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub content: String,
}

impl Change {
    pub fn replace(start_line: usize, end_line: usize, content: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::ReplaceLines,
            start_line,
            end_line,
            content: content.into(),
        }
    }

    pub fn insert(before_line: usize, content: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::InsertLines,
            start_line: before_line,
            end_line: before_line,
            content: content.into(),
        }
    }

    pub fn delete(start_line: usize, end_line: usize) -> Self {
        Self {
            kind: ChangeKind::DeleteLines,
            start_line,
            end_line,
            content: String::new(),
        }
    }

    pub fn is_insert(&self) -> bool {
        self.kind == ChangeKind::InsertLines
    }

    /// Human-readable line range, used in error messages.
    pub fn range_label(&self) -> String {
        if self.is_insert() || self.start_line == self.end_line {
            self.start_line.to_string()
        } else {
            format!("{}-{}", self.start_line, self.end_line)
        }
    }

    /// Whether two changes touch the same original lines.
    ///
    /// Inserts sit at a zero-width position: they clash with another insert
    /// at the same position or with a range that covers the position past
    /// its first line. An insert at the first line of a replaced range is
    /// allowed and lands before the replacement.
    pub fn overlaps(&self, other: &Change) -> bool {
        match (self.is_insert(), other.is_insert()) {
            (true, true) => self.start_line == other.start_line,
            (true, false) => {
                self.start_line > other.start_line && self.start_line <= other.end_line
            }
            (false, true) => other.overlaps(self),
            (false, false) => {
                self.start_line <= other.end_line && other.start_line <= self.end_line
            }
        }
    }
}

/// The line-level changes for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub file_path: String,
    pub changes: Vec<Change>,
    #[serde(default)]
    pub function_name: Option<String>,
}

impl Patch {
    pub fn new(file_path: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            file_path: file_path.into(),
            changes,
            function_name: None,
        }
    }

    pub fn with_function(mut self, function_name: Option<String>) -> Self {
        self.function_name = function_name;
        self
    }

    pub fn min_start_line(&self) -> usize {
        self.changes
            .iter()
            .map(|c| c.start_line)
            .min()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            success: errors.is_empty(),
            errors,
        }
    }
}

/// The full proposed fix for one bug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    pub implementation_id: String,
    pub strategy_id: String,
    pub bug_type: BugKind,
    pub bug_location: String,
    pub bug_line: usize,
    pub patches: Vec<Patch>,
    pub language: Language,
    pub description: String,
    pub approach: String,
    pub risk_level: RiskLevel,
    pub confidence_level: f64,
    #[serde(default)]
    pub validation_result: Option<ValidationResult>,
    pub generated_at: DateTime<Utc>,
    /// Set when no fix could be generated; `patches` is empty in that case.
    #[serde(default)]
    pub error: Option<String>,
}

impl Implementation {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.patches.iter().map(|p| p.changes.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    NoChanges,
    Success,
    PartialSuccess,
    ValidationFailed,
    Failed,
}

impl ApplyStatus {
    /// Aggregate status once every file has been processed.
    pub fn derive(had_patches: bool, modified: usize, failed: usize) -> Self {
        if !had_patches {
            ApplyStatus::NoChanges
        } else if modified == 0 {
            ApplyStatus::Failed
        } else if failed == 0 {
            ApplyStatus::Success
        } else {
            ApplyStatus::PartialSuccess
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModification {
    pub file_path: String,
    pub changes_applied: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file_path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original_file: PathBuf,
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub implementation_id: String,
    pub status: ApplyStatus,
    pub dry_run: bool,
    pub files_modified: Vec<FileModification>,
    pub files_failed: Vec<FileFailure>,
    pub backups_created: Vec<BackupRecord>,
    pub validation_results: Vec<ValidationResult>,
    /// Non-fatal findings such as progressive validation failures
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ApplyResult {
    pub fn new(implementation_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            implementation_id: implementation_id.into(),
            status: ApplyStatus::NoChanges,
            dry_run,
            files_modified: Vec::new(),
            files_failed: Vec::new(),
            backups_created: Vec::new(),
            validation_results: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ApplyStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Success,
    PartialSuccess,
    Failed,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub implementation_id: String,
    pub status: RollbackStatus,
    pub files_restored: Vec<String>,
    pub files_failed: Vec<FileFailure>,
}

impl RollbackResult {
    pub fn not_found(implementation_id: impl Into<String>) -> Self {
        Self {
            implementation_id: implementation_id.into(),
            status: RollbackStatus::NotFound,
            files_restored: Vec::new(),
            files_failed: Vec::new(),
        }
    }
}
