//! Runtime adapters for mend (configuration, backups, filesystem access).

pub mod backup;
pub mod config;
pub mod fs_util;
pub mod workspace;
