//! Configuration management for mend
//!
//! Looks for `<repo>/.mend/config.toml`, then `~/.config/mend/config.toml`.

use anyhow::{Context, Result};
use mend_core::priority::FileWeights;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::fs_util::write_atomic;

pub const BACKUP_DIR_ENV: &str = "MEND_BACKUP_DIR";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backup root, relative paths resolve against the repository root
    pub backup_dir: PathBuf,
    pub apply: ApplyDefaults,
    pub priority: PrioritySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(".mend/backups"),
            apply: ApplyDefaults::default(),
            priority: PrioritySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyDefaults {
    pub dry_run: bool,
    pub progressive: bool,
    pub validate_after_each_file: bool,
    pub validate_patches: bool,
}

impl Default for ApplyDefaults {
    fn default() -> Self {
        Self {
            dry_run: false,
            progressive: true,
            validate_after_each_file: true,
            validate_patches: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritySettings {
    pub file_weights: FileWeights,
    /// Path substring → business value in [0,1]
    pub business_value: BTreeMap<String, f64>,
    pub project_phase: Option<String>,
}

impl Config {
    fn sanitize(&mut self) {
        for value in self.priority.business_value.values_mut() {
            *value = value.clamp(0.0, 1.0);
        }
    }

    /// Repository-local config path
    pub fn repo_config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(".mend").join(CONFIG_FILE)
    }

    /// Per-user config path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mend").join(CONFIG_FILE))
    }

    /// Load the first config found, or defaults
    pub fn load(repo_root: &Path) -> Self {
        let candidates = std::iter::once(Self::repo_config_path(repo_root))
            .chain(Self::user_config_path());
        for path in candidates {
            if path.is_file() {
                return Self::load_from(&path);
            }
        }
        debug!("no config file found, using defaults");
        Self::default()
    }

    /// Load one file. A file that fails to parse is set aside as
    /// `config.toml.corrupt` and defaults are returned.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!("cannot read config {}: {}", path.display(), err);
                return Self::default();
            }
        };
        match toml::from_str::<Config>(&content) {
            Ok(mut config) => {
                config.sanitize();
                debug!("loaded config from {}", path.display());
                config
            }
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    "config file {} was corrupted ({}); a backup was saved and defaults were loaded",
                    path.display(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Save config atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut sanitized = self.clone();
        sanitized.sanitize();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(&sanitized).context("Failed to serialize config")?;
        write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Effective backup root: `MEND_BACKUP_DIR`, else `backup_dir` under the repo.
    pub fn backup_root(&self, repo_root: &Path) -> PathBuf {
        let configured = std::env::var_os(BACKUP_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.backup_dir.clone());
        if configured.is_absolute() {
            configured
        } else {
            repo_root.join(configured)
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
