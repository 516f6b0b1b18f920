//! Filesystem helpers shared by the backup store, config and applier.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// A patch path that cannot be used under a working directory.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path leaves the working directory")]
    Escapes,
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.mend-tmp", name))
}

/// Write `content` to a sibling temp file and rename it over `path`.
///
/// Readers see either the old or the new content, never a partial write.
/// Permissions of an existing file are carried over to the replacement.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let tmp_path = temp_path_for(path);
    let previous_permissions = fs::metadata(path).ok().map(|m| m.permissions());

    {
        let mut file = fs::File::create(&tmp_path)?;
        if let Err(err) = file.write_all(content).and_then(|_| file.sync_all()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
    }

    if let Some(perms) = previous_permissions {
        let _ = fs::set_permissions(&tmp_path, perms);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

/// Resolve `file_path` against `base_dir`, refusing paths that leave it.
///
/// Relative paths may only use plain components. Absolute paths are
/// accepted when, with symlinks resolved, they point inside `base_dir`;
/// a missing absolute path is an `Io` error of kind `NotFound`.
pub fn resolve_within(base_dir: &Path, file_path: &str) -> Result<PathBuf, PathError> {
    let path = Path::new(file_path);
    if path.as_os_str().is_empty() {
        return Err(PathError::Escapes);
    }
    if !path.is_absolute() {
        let plain = path
            .components()
            .all(|c| matches!(c, Component::CurDir | Component::Normal(_)));
        return if plain {
            Ok(base_dir.join(path))
        } else {
            Err(PathError::Escapes)
        };
    }

    let root = fs::canonicalize(base_dir)?;
    let full = fs::canonicalize(path)?;
    if full.starts_with(&root) {
        Ok(full)
    } else {
        Err(PathError::Escapes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "old\n").unwrap();

        write_atomic(&path, b"new\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".mend-tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        write_atomic(&path, b"#!/bin/sh\necho hi\n").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_resolve_within_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_within(dir.path(), "src/a.py").unwrap(),
            dir.path().join("src/a.py")
        );
        assert!(matches!(
            resolve_within(dir.path(), "../a.py"),
            Err(PathError::Escapes)
        ));
        assert!(matches!(
            resolve_within(dir.path(), "src/../../a.py"),
            Err(PathError::Escapes)
        ));
        assert!(matches!(resolve_within(dir.path(), ""), Err(PathError::Escapes)));
    }

    #[test]
    fn test_resolve_within_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let inside = dir.path().join("a.py");
        let outside = other.path().join("b.py");
        fs::write(&inside, "x = 1\n").unwrap();
        fs::write(&outside, "y = 1\n").unwrap();

        let resolved = resolve_within(dir.path(), &inside.to_string_lossy()).unwrap();
        assert_eq!(resolved, fs::canonicalize(&inside).unwrap());
        assert!(matches!(
            resolve_within(dir.path(), &outside.to_string_lossy()),
            Err(PathError::Escapes)
        ));
        let missing = dir.path().join("gone.py");
        match resolve_within(dir.path(), &missing.to_string_lossy()) {
            Err(PathError::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
