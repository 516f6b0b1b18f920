//! PatchValidator: consistency and syntax checks that never write to disk.

use mend_adapters::fs_util::{resolve_within, PathError};
use mend_core::parser::check_syntax;
use mend_core::transform::apply_changes;
use mend_core::{Change, Implementation, InputError, Language, Patch, ValidationResult};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where the validator reads current file text from.
pub trait SourceLookup {
    fn read_source(&self, path: &str) -> Result<String, InputError>;
}

/// Reads files from disk, resolving paths against `base_dir`.
///
/// Paths follow the same rules as the applier: relative paths without
/// `..`, or absolute paths inside `base_dir`.
#[derive(Debug, Clone)]
pub struct FsSources {
    base_dir: PathBuf,
}

impl FsSources {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf, InputError> {
        resolve_within(&self.base_dir, path).map_err(|err| input_error(path, err))
    }
}

fn input_error(path: &str, err: PathError) -> InputError {
    match err {
        PathError::Escapes => InputError::OutsideWorkspace(path.to_string()),
        PathError::Io(err) if err.kind() == io::ErrorKind::NotFound => {
            InputError::FileNotFound(path.to_string())
        }
        PathError::Io(err) => InputError::Unreadable {
            path: path.to_string(),
            message: err.to_string(),
        },
    }
}

impl SourceLookup for FsSources {
    fn read_source(&self, path: &str) -> Result<String, InputError> {
        let resolved = self.resolve(path)?;
        fs::read_to_string(&resolved).map_err(|err| input_error(path, err.into()))
    }
}

impl SourceLookup for HashMap<String, String> {
    fn read_source(&self, path: &str) -> Result<String, InputError> {
        self.get(path)
            .cloned()
            .ok_or_else(|| InputError::FileNotFound(path.to_string()))
    }
}

impl SourceLookup for BTreeMap<String, String> {
    fn read_source(&self, path: &str) -> Result<String, InputError> {
        self.get(path)
            .cloned()
            .ok_or_else(|| InputError::FileNotFound(path.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatchValidator;

impl PatchValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check every file the implementation touches.
    pub fn validate(
        &self,
        implementation: &Implementation,
        sources: &dyn SourceLookup,
    ) -> ValidationResult {
        let mut errors = Vec::new();

        for (file, changes) in changes_by_file(&implementation.patches) {
            let overlaps = overlap_errors(file, &changes);
            let consistent = overlaps.is_empty();
            errors.extend(overlaps);

            let original = match sources.read_source(file) {
                Ok(text) => text,
                Err(err) => {
                    errors.push(err.to_string());
                    continue;
                }
            };
            if !consistent {
                continue;
            }

            let owned: Vec<Change> = changes.into_iter().cloned().collect();
            if let Err(reason) = check_file(file, &original, &owned) {
                errors.push(reason);
            }
        }

        ValidationResult::from_errors(errors)
    }

    /// Re-check files after some of them were written.
    ///
    /// Written files must still parse; files not processed yet must exist.
    pub fn check_progress(
        &self,
        written: &[String],
        pending: &[String],
        sources: &dyn SourceLookup,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        for file in written {
            match sources.read_source(file) {
                Ok(text) => {
                    if let Err(reason) = check_syntax(&text, Language::from_path(file), Some(Path::new(file))) {
                        errors.push(format!("syntax error in {}: {}", file, reason));
                    }
                }
                Err(err) => errors.push(err.to_string()),
            }
        }
        for file in pending {
            if let Err(err) = sources.read_source(file) {
                errors.push(err.to_string());
            }
        }
        ValidationResult::from_errors(errors)
    }
}

/// Apply `changes` in memory and make sure the result still parses.
pub fn check_file(file: &str, original: &str, changes: &[Change]) -> Result<String, String> {
    let updated = apply_changes(original, changes).map_err(|e| format!("{}: {}", file, e))?;
    check_syntax(&updated, Language::from_path(file), Some(Path::new(file)))
        .map_err(|reason| format!("syntax error in {}: {}", file, reason))?;
    Ok(updated)
}

/// Changes grouped by file, in first-seen order within each file.
fn changes_by_file(patches: &[Patch]) -> BTreeMap<&str, Vec<&Change>> {
    let mut grouped: BTreeMap<&str, Vec<&Change>> = BTreeMap::new();
    for patch in patches {
        grouped
            .entry(patch.file_path.as_str())
            .or_default()
            .extend(patch.changes.iter());
    }
    grouped
}

fn overlap_errors(file: &str, changes: &[&Change]) -> Vec<String> {
    let mut sorted: Vec<&Change> = changes.to_vec();
    sorted.sort_by_key(|c| (c.start_line, c.end_line, !c.is_insert()));

    let mut errors = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            if a.overlaps(b) {
                errors.push(format!(
                    "overlapping changes at lines {} and {} in {}",
                    a.range_label(),
                    b.range_label(),
                    file
                ));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mend_core::{BugKind, RiskLevel};

    fn implementation(patches: Vec<Patch>) -> Implementation {
        Implementation {
            implementation_id: "impl_test".into(),
            strategy_id: "s1".into(),
            bug_type: BugKind::Generic,
            bug_location: "a.py".into(),
            bug_line: 1,
            patches,
            language: Language::Python,
            description: String::new(),
            approach: String::new(),
            risk_level: RiskLevel::Low,
            confidence_level: 0.8,
            validation_result: None,
            generated_at: Utc::now(),
            error: None,
        }
    }

    fn sources() -> HashMap<String, String> {
        let body: String = (1..=10).map(|i| format!("x{} = {}\n", i, i)).collect();
        HashMap::from([("a.py".to_string(), body)])
    }

    #[test]
    fn test_overlapping_changes_are_rejected() {
        let imp = implementation(vec![Patch::new(
            "a.py",
            vec![Change::replace(5, 7, "y = 1"), Change::replace(6, 8, "z = 2")],
        )]);
        let result = PatchValidator::new().validate(&imp, &sources());
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("overlapping changes at lines 5-7 and 6-8"));
    }

    #[test]
    fn test_overlap_across_patches_of_same_file() {
        let imp = implementation(vec![
            Patch::new("a.py", vec![Change::replace(2, 3, "y = 1")]),
            Patch::new("a.py", vec![Change::delete(3, 3)]),
        ]);
        let result = PatchValidator::new().validate(&imp, &sources());
        assert!(!result.success);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let imp = implementation(vec![Patch::new("gone.py", vec![Change::insert(1, "x = 1")])]);
        let result = PatchValidator::new().validate(&imp, &sources());
        assert!(!result.success);
        assert!(result.errors[0].contains("gone.py"));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let imp = implementation(vec![Patch::new("a.py", vec![Change::replace(2, 2, "def broken(:")])]);
        let result = PatchValidator::new().validate(&imp, &sources());
        assert!(!result.success);
        assert!(result.errors[0].starts_with("syntax error in a.py"));
    }

    #[test]
    fn test_out_of_range_change() {
        let imp = implementation(vec![Patch::new("a.py", vec![Change::replace(9, 12, "y = 1")])]);
        let result = PatchValidator::new().validate(&imp, &sources());
        assert!(!result.success);
        assert!(result.errors[0].contains("outside the file"));
    }

    #[test]
    fn test_valid_implementation() {
        let imp = implementation(vec![Patch::new(
            "a.py",
            vec![Change::insert(1, "import os"), Change::replace(1, 1, "x1 = os.sep")],
        )]);
        assert!(PatchValidator::new().validate(&imp, &sources()).success);
    }

    #[test]
    fn test_progress_check_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("bad.py"), "def (:\n").unwrap();
        let fs_sources = FsSources::new(dir.path());

        let result = PatchValidator::new().check_progress(
            &["ok.py".to_string(), "bad.py".to_string()],
            &["missing.py".to_string()],
            &fs_sources,
        );
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("bad.py"));
        assert!(result.errors[1].contains("missing.py"));
    }

    #[test]
    fn test_disk_sources_follow_applier_path_rules() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let fs_sources = FsSources::new(dir.path());
        let absolute = dir.path().join("a.py").to_string_lossy().into_owned();

        let imp = implementation(vec![Patch::new(
            absolute.as_str(),
            vec![Change::replace(1, 1, "x = 2")],
        )]);
        assert!(PatchValidator::new().validate(&imp, &fs_sources).success);

        let escape = implementation(vec![Patch::new("../a.py", vec![Change::insert(1, "y = 1")])]);
        let result = PatchValidator::new().validate(&escape, &fs_sources);
        assert!(!result.success);
        assert!(result.errors[0].contains("leaves the working directory"));
    }
}
