//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Example
//!
//! ```toml
//! [global]
//! locking_type = "file"
//! locking_dir = "/run/lock/vgcache"
//! wait_for_locks = true
//! test_mode = false
//!
//! [backup]
//! backup = true
//! backup_dir = "/etc/vgcache/backup"
//! archive = true
//! archive_dir = "/etc/vgcache/archive"
//! retain_min = 10
//! retain_days = 30
//! ```
//!
//! # Validation
//!
//! Config values are validated after parsing: directories must be
//! absolute and a configured hostname must be non-empty.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Which lock backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockingType {
    /// Advisory lock files in `locking_dir`.
    File,
    /// No locking at all. Only safe when nothing else touches the devices.
    None,
    /// Read locks are granted, write locks are refused.
    ReadOnly,
    /// A cluster lock manager. Must be supplied by the embedding program.
    Clustered,
}

impl std::fmt::Display for LockingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockingType::File => "file",
            LockingType::None => "none",
            LockingType::ReadOnly => "read_only",
            LockingType::Clustered => "clustered",
        };
        f.write_str(name)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Locking and process-wide settings
    pub global: Option<GlobalSection>,

    /// Archive and backup settings
    pub backup: Option<BackupSection>,
}

impl ConfigFile {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(global) = &self.global {
            global.validate()?;
        }
        if let Some(backup) = &self.backup {
            backup.validate()?;
        }
        Ok(())
    }
}

fn require_absolute(key: &str, path: &Option<PathBuf>) -> Result<(), ConfigError> {
    match path {
        Some(p) if !p.is_absolute() => Err(ConfigError::InvalidValue(format!(
            "{} must be an absolute path, got '{}'",
            key,
            p.display()
        ))),
        _ => Ok(()),
    }
}

/// `[global]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalSection {
    /// Lock backend (default: file)
    pub locking_type: Option<LockingType>,

    /// Directory for lock files
    pub locking_dir: Option<PathBuf>,

    /// Whether lock requests may block (default: true)
    pub wait_for_locks: Option<bool>,

    /// Simulation mode: metadata is never archived or backed up
    pub test_mode: Option<bool>,

    /// Override for the local host name used in precedence decisions
    pub hostname: Option<String>,
}

impl GlobalSection {
    fn validate(&self) -> Result<(), ConfigError> {
        require_absolute("global.locking_dir", &self.locking_dir)?;
        if let Some(host) = &self.hostname {
            if host.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "global.hostname cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// `[backup]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BackupSection {
    /// Keep a current backup of every group (default: true)
    pub backup: Option<bool>,

    /// Directory for current backups
    pub backup_dir: Option<PathBuf>,

    /// Archive a snapshot before every change (default: true)
    pub archive: Option<bool>,

    /// Directory for archived snapshots
    pub archive_dir: Option<PathBuf>,

    /// Minimum number of archives kept per group (default: 10)
    pub retain_min: Option<u32>,

    /// Archives younger than this many days are kept (default: 30)
    pub retain_days: Option<u32>,
}

impl BackupSection {
    fn validate(&self) -> Result<(), ConfigError> {
        require_absolute("backup.backup_dir", &self.backup_dir)?;
        require_absolute("backup.archive_dir", &self.archive_dir)?;
        Ok(())
    }
}
