//! core::config
//!
//! Configuration schema and loading.
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Config file
//! 3. CLI flags (not handled here)
//!
//! # Config Locations
//!
//! Searched in order, first match wins:
//! 1. `$VGCACHE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/vgcache/config.toml`
//! 3. `~/.vgcache/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use vgcache::core::config::Config;
//!
//! let config = Config::load().unwrap();
//! println!("Locking dir: {}", config.locking_dir().display());
//! println!("Archive retain_min: {}", config.retain_min());
//! ```

pub mod schema;

pub use schema::{BackupSection, ConfigFile, GlobalSection, LockingType};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::paths::SystemPaths;

/// Default directory for lock files.
pub const DEFAULT_LOCKING_DIR: &str = "/run/lock/vgcache";
/// Default directory for current backups.
pub const DEFAULT_BACKUP_DIR: &str = "/etc/vgcache/backup";
/// Default directory for archived snapshots.
pub const DEFAULT_ARCHIVE_DIR: &str = "/etc/vgcache/archive";
/// Default minimum number of archives kept per group.
pub const DEFAULT_RETAIN_MIN: u32 = 10;
/// Default archive age, in days, below which archives are always kept.
pub const DEFAULT_RETAIN_DAYS: u32 = 30;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Loaded configuration.
///
/// Accessor methods apply defaults for anything the file leaves unset.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parsed file contents
    pub file: ConfigFile,
    /// Path the file was loaded from (if any)
    path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    /// A missing config file is not an error (defaults are used).
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let file = Self::read_config_file(path)?;
        file.validate()?;
        Ok(Self {
            file,
            path: Some(path.to_path_buf()),
        })
    }

    /// Build a configuration from already-parsed contents.
    pub fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        file.validate()?;
        Ok(Self { file, path: None })
    }

    fn find_config_file() -> Option<PathBuf> {
        // 1. Check $VGCACHE_CONFIG
        if let Ok(path) = std::env::var("VGCACHE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Check $XDG_CONFIG_HOME/vgcache/config.toml
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("vgcache/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        // 3. Check ~/.vgcache/config.toml
        let path = dirs::home_dir()?.join(".vgcache/config.toml");
        path.exists().then_some(path)
    }

    fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// The file this configuration was loaded from.
    pub fn source_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // =========================================================================
    // Accessor methods with defaults
    // =========================================================================

    fn global(&self) -> Option<&GlobalSection> {
        self.file.global.as_ref()
    }

    fn backup_section(&self) -> Option<&BackupSection> {
        self.file.backup.as_ref()
    }

    /// Lock backend. Defaults to `file`.
    pub fn locking_type(&self) -> LockingType {
        self.global()
            .and_then(|g| g.locking_type)
            .unwrap_or(LockingType::File)
    }

    /// Lock file directory.
    pub fn locking_dir(&self) -> PathBuf {
        self.global()
            .and_then(|g| g.locking_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCKING_DIR))
    }

    /// Whether lock requests may block. Defaults to `true`.
    pub fn wait_for_locks(&self) -> bool {
        self.global().and_then(|g| g.wait_for_locks).unwrap_or(true)
    }

    /// Whether simulation mode is on. Defaults to `false`.
    pub fn test_mode(&self) -> bool {
        self.global().and_then(|g| g.test_mode).unwrap_or(false)
    }

    /// Configured host name override.
    pub fn hostname(&self) -> Option<&str> {
        self.global().and_then(|g| g.hostname.as_deref())
    }

    /// Whether current backups are kept. Defaults to `true`.
    pub fn backup_enabled(&self) -> bool {
        self.backup_section().and_then(|b| b.backup).unwrap_or(true)
    }

    /// Current backup directory.
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_section()
            .and_then(|b| b.backup_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR))
    }

    /// Whether snapshots are archived. Defaults to `true`.
    pub fn archive_enabled(&self) -> bool {
        self.backup_section().and_then(|b| b.archive).unwrap_or(true)
    }

    /// Archive directory.
    pub fn archive_dir(&self) -> PathBuf {
        self.backup_section()
            .and_then(|b| b.archive_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_DIR))
    }

    /// Minimum archives kept per group.
    pub fn retain_min(&self) -> u32 {
        self.backup_section()
            .and_then(|b| b.retain_min)
            .unwrap_or(DEFAULT_RETAIN_MIN)
    }

    /// Archive age in days below which nothing is pruned.
    pub fn retain_days(&self) -> u32 {
        self.backup_section()
            .and_then(|b| b.retain_days)
            .unwrap_or(DEFAULT_RETAIN_DAYS)
    }

    /// Path router for the configured directories.
    pub fn paths(&self) -> SystemPaths {
        SystemPaths::new(self.locking_dir(), self.backup_dir(), self.archive_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.locking_type(), LockingType::File);
        assert_eq!(config.locking_dir(), PathBuf::from(DEFAULT_LOCKING_DIR));
        assert!(config.wait_for_locks());
        assert!(!config.test_mode());
        assert!(config.backup_enabled());
        assert!(config.archive_enabled());
        assert_eq!(config.retain_min(), 10);
        assert_eq!(config.retain_days(), 30);
        assert!(config.hostname().is_none());
        assert!(config.source_path().is_none());
    }

    #[test]
    fn load_from_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[global]\nlocking_type = \"none\"\n\n[backup]\nretain_days = 7\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.locking_type(), LockingType::None);
        assert_eq!(config.retain_days(), 7);
        assert_eq!(config.retain_min(), DEFAULT_RETAIN_MIN);
        assert_eq!(config.source_path(), Some(path.as_path()));
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[global\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn load_from_missing_file_is_read_error() {
        let temp = TempDir::new().unwrap();
        let err = Config::load_from(&temp.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn paths_follow_config() {
        let file = ConfigFile {
            global: Some(GlobalSection {
                locking_dir: Some(PathBuf::from("/tmp/l")),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = Config::from_file(file).unwrap();
        let paths = config.paths();
        assert_eq!(paths.locking_dir(), Path::new("/tmp/l"));
        assert_eq!(paths.backup_dir, PathBuf::from(DEFAULT_BACKUP_DIR));
    }
}
