//! Folder walking for batch analysis.

use anyhow::{Context, Result};
use mend_core::Language;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Files above this size are skipped
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

const IGNORE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    ".next",
    "__pycache__",
    ".venv",
    "venv",
    ".mend",
];

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORE_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Source files of a known language under `root`, sorted by path.
///
/// Paths are relative to `root`. Unreadable and non-UTF-8 files are skipped.
pub fn collect_sources(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if Language::from_path(path) == Language::Unknown {
            continue;
        }
        let too_big = entry
            .metadata()
            .map(|m| m.len() > MAX_FILE_BYTES)
            .unwrap_or(true);
        if too_big {
            debug!("skipping {} (size)", path.display());
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            debug!("skipping {} (unreadable)", path.display());
            continue;
        };
        let relative = path
            .strip_prefix(root)
            .with_context(|| format!("{} escaped {}", path.display(), root.display()))?;
        files.push((relative.to_path_buf(), content));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_sources_skips_ignored_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("src/b.py"), "x = 1\n").unwrap();
        fs::write(root.join("src/a.go"), "package a\n").unwrap();
        fs::write(root.join("README.md"), "# hi\n").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "module.exports = 1;\n").unwrap();

        let files = collect_sources(root).unwrap();
        let paths: Vec<_> = files.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("src/a.go"), PathBuf::from("src/b.py")]);
    }

    #[test]
    fn test_collect_sources_skips_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let big = "#".repeat(MAX_FILE_BYTES as usize + 1);
        fs::write(dir.path().join("big.py"), big).unwrap();
        fs::write(dir.path().join("small.py"), "pass\n").unwrap();

        let files = collect_sources(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, PathBuf::from("small.py"));
    }

    #[test]
    fn test_collect_sources_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "").unwrap();
        assert!(collect_sources(&file).is_err());
    }
}
