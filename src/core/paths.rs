//! core::paths
//!
//! Centralized path routing for on-host storage locations.
//!
//! # Storage Layout
//!
//! - `<locking_dir>/V_<vg>` - lock file for a volume group
//! - `<locking_dir>/P_<name>` - lock file for a reserved resource
//!   (`P_global`, `P_orphans`)
//! - `<backup_dir>/<vg>` - the single current backup of a group
//! - `<archive_dir>/<vg>_<index>-<suffix>.vg` - timestamped snapshots
//!
//! **Hard rule:** no other module joins file names onto these
//! directories. Everything goes through `SystemPaths`.
//!
//! # Example
//!
//! ```
//! use vgcache::core::paths::SystemPaths;
//! use vgcache::core::types::{LockResource, VgName};
//! use std::path::PathBuf;
//!
//! let paths = SystemPaths::new("/run/lock/vgcache", "/etc/vgcache/backup", "/etc/vgcache/archive");
//! let vg0 = VgName::new("vg0").unwrap();
//!
//! assert_eq!(
//!     paths.lock_file_path(&LockResource::for_vg(&vg0)),
//!     PathBuf::from("/run/lock/vgcache/V_vg0")
//! );
//! assert_eq!(
//!     paths.lock_file_path(&LockResource::Global),
//!     PathBuf::from("/run/lock/vgcache/P_global")
//! );
//! assert_eq!(paths.backup_path(&vg0), PathBuf::from("/etc/vgcache/backup/vg0"));
//! ```

use std::path::{Path, PathBuf};

use crate::core::types::{LockResource, VgName};

/// Extension used by archive files.
pub const ARCHIVE_EXTENSION: &str = "vg";

/// Centralized path routing for lock, backup and archive storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    /// Directory holding one lock file per resource.
    pub locking_dir: PathBuf,
    /// Directory holding the current backup of each group.
    pub backup_dir: PathBuf,
    /// Directory holding archived snapshots.
    pub archive_dir: PathBuf,
}

impl SystemPaths {
    /// Create a new path router.
    pub fn new(
        locking_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            locking_dir: locking_dir.into(),
            backup_dir: backup_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// Get the lock file for a resource.
    ///
    /// Volume groups use `V_<name>`; reserved resources drop their leading
    /// `#` and use `P_<name>`.
    pub fn lock_file_path(&self, resource: &LockResource) -> PathBuf {
        let name = match resource {
            LockResource::Vg(vg) => format!("V_{}", vg.as_str()),
            reserved => format!("P_{}", reserved.as_str().trim_start_matches('#')),
        };
        self.locking_dir.join(name)
    }

    /// Get the backup file for a group.
    pub fn backup_path(&self, vg: &VgName) -> PathBuf {
        self.backup_dir.join(vg.as_str())
    }

    /// Get the temporary file used while replacing a backup.
    pub fn backup_temp_path(&self, vg: &VgName) -> PathBuf {
        self.backup_dir.join(format!(".{}.tmp", vg.as_str()))
    }

    /// Get the file name prefix shared by a group's archives.
    ///
    /// This is `<vg>_`.
    pub fn archive_prefix(vg: &VgName) -> String {
        format!("{}_", vg.as_str())
    }

    /// Get the path of an archive file.
    ///
    /// This is `<archive_dir>/<vg>_<index:05>-<suffix>.vg`.
    pub fn archive_path(&self, vg: &VgName, index: u32, suffix: u32) -> PathBuf {
        self.archive_dir.join(format!(
            "{}{:05}-{}.{}",
            Self::archive_prefix(vg),
            index,
            suffix,
            ARCHIVE_EXTENSION
        ))
    }

    /// Parse the archive index out of a file name belonging to `vg`.
    ///
    /// Returns `None` for files that are not archives of this group.
    pub fn parse_archive_index(vg: &VgName, file_name: &str) -> Option<u32> {
        let rest = file_name.strip_prefix(&Self::archive_prefix(vg))?;
        let rest = rest.strip_suffix(&format!(".{}", ARCHIVE_EXTENSION))?;
        let (index, suffix) = rest.split_once('-')?;
        if index.len() < 5 || suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        index.parse().ok()
    }

    /// Get the locking directory as a Path reference.
    pub fn locking_dir(&self) -> &Path {
        &self.locking_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> SystemPaths {
        SystemPaths::new("/l", "/b", "/a")
    }

    fn vg(name: &str) -> VgName {
        VgName::new(name).unwrap()
    }

    #[test]
    fn orphan_lock_file() {
        assert_eq!(
            paths().lock_file_path(&LockResource::Orphans),
            PathBuf::from("/l/P_orphans")
        );
    }

    #[test]
    fn archive_path_format() {
        assert_eq!(
            paths().archive_path(&vg("vg0"), 7, 1234),
            PathBuf::from("/a/vg0_00007-1234.vg")
        );
    }

    #[test]
    fn parse_archive_index_roundtrip() {
        let path = paths().archive_path(&vg("vg0"), 42, 99);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(SystemPaths::parse_archive_index(&vg("vg0"), name), Some(42));
    }

    #[test]
    fn parse_archive_index_rejects_other_groups() {
        // "vg0_x" archives share the "vg0_" prefix but not the index layout
        assert_eq!(
            SystemPaths::parse_archive_index(&vg("vg0"), "vg0_x_00001-5.vg"),
            None
        );
        assert_eq!(
            SystemPaths::parse_archive_index(&vg("vg0"), "vg1_00001-5.vg"),
            None
        );
        assert_eq!(
            SystemPaths::parse_archive_index(&vg("vg0"), "vg0_00001-5.txt"),
            None
        );
    }

    #[test]
    fn backup_temp_is_hidden() {
        let tmp = paths().backup_temp_path(&vg("vg0"));
        assert_eq!(tmp, PathBuf::from("/b/.vg0.tmp"));
    }
}
