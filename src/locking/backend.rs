//! locking::backend
//!
//! Lock backends: the part of locking that talks to other processes.
//!
//! # Backends
//!
//! - [`FileLocking`] - one advisory lock file per resource under the
//!   locking directory (`V_<vg>`, `P_global`, `P_orphans`)
//! - [`NoLocking`] - grants everything; only safe on a quiet host
//! - [`ReadOnlyLocking`] - wraps another backend and refuses write locks
//!
//! Cluster lock managers implement [`LockBackend`] outside this crate and
//! are handed to [`LockManager::new`](super::LockManager::new) directly.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;

use fs2::FileExt;
use tracing::debug;

use crate::core::config::{Config, ConfigError, LockingType};
use crate::core::paths::SystemPaths;
use crate::core::types::LockResource;

use super::{LockError, LockFlags, LockMode};

/// Something that arbitrates named locks between processes.
pub trait LockBackend: fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Take, convert, or release a lock.
    ///
    /// `LockMode::Unlock` on a resource that is not held succeeds.
    fn lock_resource(
        &mut self,
        resource: &LockResource,
        mode: LockMode,
        flags: LockFlags,
    ) -> Result<(), LockError>;

    /// Mode this backend believes the resource is held in by us.
    fn query_resource(&self, resource: &LockResource) -> Option<LockMode>;

    /// Release everything, keeping the backend usable.
    fn reset(&mut self) -> Result<(), LockError>;

    /// Release everything and shut down.
    fn fin(&mut self);

    /// Whether requests may wait for a conflicting holder.
    fn supports_blocking(&self) -> bool {
        true
    }
}

/// Build the backend selected by configuration.
///
/// # Errors
///
/// `locking_type = "clustered"` cannot be satisfied from configuration
/// alone and is rejected.
pub fn backend_from_config(config: &Config) -> Result<Box<dyn LockBackend>, ConfigError> {
    let wait = config.wait_for_locks();
    let backend: Box<dyn LockBackend> = match config.locking_type() {
        LockingType::File => Box::new(FileLocking::new(config.paths(), wait)),
        LockingType::None => Box::new(NoLocking::default()),
        LockingType::ReadOnly => {
            Box::new(ReadOnlyLocking::new(FileLocking::new(config.paths(), wait)))
        }
        LockingType::Clustered => {
            return Err(ConfigError::InvalidValue(
                "locking_type 'clustered' needs a cluster lock backend supplied by the caller"
                    .to_string(),
            ))
        }
    };
    Ok(backend)
}

/// Held lock file and the mode it is locked in.
#[derive(Debug)]
struct HeldFile {
    file: File,
    mode: LockMode,
}

/// Advisory lock files, one per resource.
///
/// Locks are taken with `flock`-style shared/exclusive locks through
/// `fs2`, so they are released by the OS if the process dies. A held
/// resource keeps its file descriptor open; converting between read and
/// write re-locks the same descriptor.
#[derive(Debug)]
pub struct FileLocking {
    paths: SystemPaths,
    wait: bool,
    held: HashMap<LockResource, HeldFile>,
}

impl FileLocking {
    /// Create a backend rooted at `paths.locking_dir`.
    ///
    /// With `wait == false` every request behaves as non-blocking.
    pub fn new(paths: SystemPaths, wait: bool) -> Self {
        Self {
            paths,
            wait,
            held: HashMap::new(),
        }
    }

    fn open(&self, resource: &LockResource) -> Result<File, LockError> {
        let dir = self.paths.locking_dir();
        fs::create_dir_all(dir).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let path = self.paths.lock_file_path(resource);
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e)))
    }

    fn apply(
        file: &File,
        resource: &LockResource,
        mode: LockMode,
        blocking: bool,
    ) -> Result<(), LockError> {
        let result = match (mode, blocking) {
            (LockMode::Read, true) => FileExt::lock_shared(file),
            (LockMode::Read, false) => FileExt::try_lock_shared(file),
            (LockMode::Write, true) => FileExt::lock_exclusive(file),
            (LockMode::Write, false) => FileExt::try_lock_exclusive(file),
            (LockMode::Unlock, _) => FileExt::unlock(file),
        };
        result.map_err(|e| Self::map_err(e, resource, mode))
    }

    fn map_err(e: io::Error, resource: &LockResource, mode: LockMode) -> LockError {
        if e.kind() == io::ErrorKind::WouldBlock
            || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
        {
            return LockError::WouldBlock {
                resource: resource.clone(),
            };
        }
        LockError::Backend {
            action: if mode == LockMode::Unlock {
                "unlock"
            } else {
                "lock"
            },
            resource: resource.clone(),
            message: e.to_string(),
        }
    }
}

impl LockBackend for FileLocking {
    fn name(&self) -> &'static str {
        "file"
    }

    fn lock_resource(
        &mut self,
        resource: &LockResource,
        mode: LockMode,
        flags: LockFlags,
    ) -> Result<(), LockError> {
        let blocking = self.wait && !flags.non_blocking;

        if mode == LockMode::Unlock {
            if let Some(held) = self.held.remove(resource) {
                Self::apply(&held.file, resource, LockMode::Unlock, blocking)?;
                debug!(resource = %resource, "released lock file");
            }
            return Ok(());
        }

        if let Some(held) = self.held.get_mut(resource) {
            Self::apply(&held.file, resource, mode, blocking)?;
            held.mode = mode;
            return Ok(());
        }

        let file = self.open(resource)?;
        Self::apply(&file, resource, mode, blocking)?;
        debug!(resource = %resource, %mode, blocking, "took lock file");
        self.held.insert(resource.clone(), HeldFile { file, mode });
        Ok(())
    }

    fn query_resource(&self, resource: &LockResource) -> Option<LockMode> {
        self.held.get(resource).map(|h| h.mode)
    }

    fn reset(&mut self) -> Result<(), LockError> {
        let mut first_err = None;
        for (resource, held) in self.held.drain() {
            if let Err(e) = FileExt::unlock(&held.file) {
                first_err.get_or_insert(Self::map_err(e, &resource, LockMode::Unlock));
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn fin(&mut self) {
        // Closing the descriptors releases the locks
        self.held.clear();
    }

    fn supports_blocking(&self) -> bool {
        self.wait
    }
}

/// Grants every request without talking to anyone.
#[derive(Debug, Default)]
pub struct NoLocking {
    held: HashMap<LockResource, LockMode>,
}

impl LockBackend for NoLocking {
    fn name(&self) -> &'static str {
        "none"
    }

    fn lock_resource(
        &mut self,
        resource: &LockResource,
        mode: LockMode,
        _flags: LockFlags,
    ) -> Result<(), LockError> {
        match mode {
            LockMode::Unlock => {
                self.held.remove(resource);
            }
            mode => {
                self.held.insert(resource.clone(), mode);
            }
        }
        Ok(())
    }

    fn query_resource(&self, resource: &LockResource) -> Option<LockMode> {
        self.held.get(resource).copied()
    }

    fn reset(&mut self) -> Result<(), LockError> {
        self.held.clear();
        Ok(())
    }

    fn fin(&mut self) {
        self.held.clear();
    }
}

/// Grants read locks through an inner backend and refuses write locks.
#[derive(Debug)]
pub struct ReadOnlyLocking {
    inner: Box<dyn LockBackend>,
}

impl ReadOnlyLocking {
    /// Wrap a backend.
    pub fn new(inner: impl LockBackend + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl LockBackend for ReadOnlyLocking {
    fn name(&self) -> &'static str {
        "read_only"
    }

    fn lock_resource(
        &mut self,
        resource: &LockResource,
        mode: LockMode,
        flags: LockFlags,
    ) -> Result<(), LockError> {
        if mode == LockMode::Write {
            return Err(LockError::Refused {
                resource: resource.clone(),
                mode,
                reason: "read-only locking is configured".to_string(),
            });
        }
        self.inner.lock_resource(resource, mode, flags)
    }

    fn query_resource(&self, resource: &LockResource) -> Option<LockMode> {
        self.inner.query_resource(resource)
    }

    fn reset(&mut self) -> Result<(), LockError> {
        self.inner.reset()
    }

    fn fin(&mut self) {
        self.inner.fin()
    }

    fn supports_blocking(&self) -> bool {
        self.inner.supports_blocking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::VgName;
    use tempfile::TempDir;

    fn file_locking(dir: &TempDir, wait: bool) -> FileLocking {
        FileLocking::new(
            SystemPaths::new(dir.path().join("locks"), dir.path(), dir.path()),
            wait,
        )
    }

    fn vg0() -> LockResource {
        LockResource::Vg(VgName::new("vg0").unwrap())
    }

    #[test]
    fn file_lock_creates_lock_file() {
        let temp = TempDir::new().unwrap();
        let mut backend = file_locking(&temp, true);

        backend
            .lock_resource(&vg0(), LockMode::Write, LockFlags::default())
            .unwrap();
        assert!(temp.path().join("locks/V_vg0").exists());
        assert_eq!(backend.query_resource(&vg0()), Some(LockMode::Write));
    }

    #[test]
    fn exclusive_lock_conflicts_across_holders() {
        let temp = TempDir::new().unwrap();
        let mut first = file_locking(&temp, true);
        let mut second = file_locking(&temp, true);

        first
            .lock_resource(&vg0(), LockMode::Write, LockFlags::default())
            .unwrap();
        let result = second.lock_resource(&vg0(), LockMode::Read, LockFlags::non_blocking());
        assert!(matches!(result, Err(LockError::WouldBlock { .. })));
        assert_eq!(second.query_resource(&vg0()), None);

        first
            .lock_resource(&vg0(), LockMode::Unlock, LockFlags::default())
            .unwrap();
        second
            .lock_resource(&vg0(), LockMode::Read, LockFlags::non_blocking())
            .unwrap();
    }

    #[test]
    fn shared_locks_coexist() {
        let temp = TempDir::new().unwrap();
        let mut first = file_locking(&temp, true);
        let mut second = file_locking(&temp, true);

        first
            .lock_resource(&vg0(), LockMode::Read, LockFlags::default())
            .unwrap();
        second
            .lock_resource(&vg0(), LockMode::Read, LockFlags::non_blocking())
            .unwrap();
    }

    #[test]
    fn no_wait_backend_never_blocks() {
        let temp = TempDir::new().unwrap();
        let mut first = file_locking(&temp, true);
        let mut second = file_locking(&temp, false);
        assert!(!second.supports_blocking());

        first
            .lock_resource(&LockResource::Global, LockMode::Write, LockFlags::default())
            .unwrap();
        let result =
            second.lock_resource(&LockResource::Global, LockMode::Write, LockFlags::default());
        assert!(matches!(result, Err(LockError::WouldBlock { .. })));
    }

    #[test]
    fn reset_releases_everything() {
        let temp = TempDir::new().unwrap();
        let mut first = file_locking(&temp, true);
        let mut second = file_locking(&temp, true);

        first
            .lock_resource(&vg0(), LockMode::Write, LockFlags::default())
            .unwrap();
        first
            .lock_resource(&LockResource::Orphans, LockMode::Write, LockFlags::default())
            .unwrap();
        first.reset().unwrap();

        second
            .lock_resource(&vg0(), LockMode::Write, LockFlags::non_blocking())
            .unwrap();
        second
            .lock_resource(&LockResource::Orphans, LockMode::Write, LockFlags::non_blocking())
            .unwrap();
    }

    #[test]
    fn unlock_of_unheld_resource_is_ok() {
        let temp = TempDir::new().unwrap();
        let mut backend = file_locking(&temp, true);
        backend
            .lock_resource(&vg0(), LockMode::Unlock, LockFlags::default())
            .unwrap();
    }

    #[test]
    fn read_only_refuses_write() {
        let mut backend = ReadOnlyLocking::new(NoLocking::default());
        let err = backend
            .lock_resource(&vg0(), LockMode::Write, LockFlags::default())
            .unwrap_err();
        assert!(matches!(err, LockError::Refused { .. }));

        backend
            .lock_resource(&vg0(), LockMode::Read, LockFlags::default())
            .unwrap();
        assert_eq!(backend.query_resource(&vg0()), Some(LockMode::Read));
    }

    #[test]
    fn clustered_from_config_is_rejected() {
        let file: crate::core::config::ConfigFile =
            toml::from_str("[global]\nlocking_type = \"clustered\"\n").unwrap();
        let config = Config::from_file(file).unwrap();
        assert!(matches!(
            backend_from_config(&config),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn none_from_config() {
        let file: crate::core::config::ConfigFile =
            toml::from_str("[global]\nlocking_type = \"none\"\n").unwrap();
        let config = Config::from_file(file).unwrap();
        assert_eq!(backend_from_config(&config).unwrap().name(), "none");
    }
}
