//! locking::manager
//!
//! Per-process lock rules on top of a backend.
//!
//! # Rules
//!
//! - Resources are taken in order: global, then volume groups by name,
//!   then orphans. A request that would go backwards is refused before
//!   the backend sees it.
//! - A write lock on a volume group requested while another volume group
//!   is held never waits. This is what keeps two processes from
//!   deadlocking on each other's groups.
//! - Taking a resource already held in the same mode is reported as an
//!   internal error and changes nothing.
//! - Every transition is forwarded to the metadata cache, which decides
//!   what stops being trustworthy.

use tracing::{debug, error, warn};

use crate::cache::MetadataCache;
use crate::core::config::{Config, ConfigError};
use crate::core::types::LockResource;

use super::backend::{backend_from_config, LockBackend};
use super::{InternalLockError, LockError, LockFlags, LockMode};

/// Lock manager for one process.
#[derive(Debug)]
pub struct LockManager {
    backend: Box<dyn LockBackend>,
}

impl LockManager {
    /// Wrap an explicit backend, such as a cluster lock manager.
    pub fn new(backend: Box<dyn LockBackend>) -> Self {
        Self { backend }
    }

    /// Build the backend selected by configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(backend_from_config(config)?))
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Take, convert or release a lock.
    ///
    /// # Errors
    ///
    /// - [`LockError::Internal`] for a nested request or an out-of-order
    ///   request; nothing changes in either case
    /// - whatever the backend reports when it refuses
    pub fn lock_vol(
        &mut self,
        cache: &mut MetadataCache,
        resource: &LockResource,
        mode: LockMode,
        mut flags: LockFlags,
    ) -> Result<(), LockError> {
        let held = cache.locks().mode(resource);

        if mode == LockMode::Unlock {
            if held.is_none() {
                error!("internal error: attempt to unlock unlocked {}", resource);
            }
            if !flags.cache_only {
                self.backend.lock_resource(resource, mode, flags)?;
            }
            cache.record_lock(resource, LockMode::Unlock);
            debug!(resource = %resource, "unlocked");
            return Ok(());
        }

        if held == Some(mode) {
            let err = InternalLockError::Nested {
                resource: resource.clone(),
            };
            error!("internal error: {}", err);
            return Err(err.into());
        }

        if held.is_none() {
            self.verify_lock_order(cache, resource)?;
        }

        if !flags.non_blocking && resource.is_vg_scope() {
            if mode == LockMode::Write && cache.locks().vgs_locked() > 0 {
                debug!(resource = %resource, "a VG is already locked; not waiting");
                flags.non_blocking = true;
            } else if !self.backend.supports_blocking() {
                flags.non_blocking = true;
            }
        }

        if !flags.cache_only {
            self.backend.lock_resource(resource, mode, flags)?;
        }
        cache.record_lock(resource, mode);
        debug!(resource = %resource, %mode, non_blocking = flags.non_blocking, "locked");
        Ok(())
    }

    /// Take a lock with default flags.
    pub fn acquire(
        &mut self,
        cache: &mut MetadataCache,
        resource: &LockResource,
        mode: LockMode,
    ) -> Result<(), LockError> {
        self.lock_vol(cache, resource, mode, LockFlags::default())
    }

    /// Release a lock.
    pub fn release(
        &mut self,
        cache: &mut MetadataCache,
        resource: &LockResource,
    ) -> Result<(), LockError> {
        self.lock_vol(cache, resource, LockMode::Unlock, LockFlags::default())
    }

    /// Check that `requested` may be taken given what is already held.
    ///
    /// The global resource may be taken at any time.
    pub fn verify_lock_order(
        &self,
        cache: &MetadataCache,
        requested: &LockResource,
    ) -> Result<(), LockError> {
        match cache.locks().order_conflict(requested) {
            Some(held) => {
                let err = InternalLockError::LockOrder {
                    requested: requested.clone(),
                    held: held.clone(),
                };
                error!("internal error: {}", err);
                Err(err.into())
            }
            None => Ok(()),
        }
    }

    /// Mode the backend believes we hold `resource` in.
    pub fn query(&self, resource: &LockResource) -> Option<LockMode> {
        self.backend.query_resource(resource)
    }

    /// Release everything held, newest resource first.
    ///
    /// Keeps going after a failure and returns the first error.
    pub fn unlock_all(&mut self, cache: &mut MetadataCache) -> Result<(), LockError> {
        let held: Vec<LockResource> = cache.locks().held().map(|(r, _)| r.clone()).collect();
        let mut first_error = None;
        for resource in held.into_iter().rev() {
            if let Err(e) = self.release(cache, &resource) {
                warn!(resource = %resource, "failed to unlock: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drop every lock through the backend and forget them in the cache.
    pub fn reset(&mut self, cache: &mut MetadataCache) -> Result<(), LockError> {
        self.backend.reset()?;
        Self::forget_all(cache);
        Ok(())
    }

    /// Shut the backend down.
    pub fn fin(&mut self, cache: &mut MetadataCache) {
        self.backend.fin();
        Self::forget_all(cache);
    }

    fn forget_all(cache: &mut MetadataCache) {
        let held: Vec<LockResource> = cache.locks().held().map(|(r, _)| r.clone()).collect();
        for resource in held {
            cache.record_lock(&resource, LockMode::Unlock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FormatName, VgName};
    use std::sync::{Arc, Mutex};

    /// Backend that grants everything and records each request.
    #[derive(Debug, Default, Clone)]
    struct Recording {
        calls: Arc<Mutex<Vec<(LockResource, LockMode, LockFlags)>>>,
        blocking: bool,
    }

    impl LockBackend for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn lock_resource(
            &mut self,
            resource: &LockResource,
            mode: LockMode,
            flags: LockFlags,
        ) -> Result<(), LockError> {
            self.calls
                .lock()
                .unwrap()
                .push((resource.clone(), mode, flags));
            Ok(())
        }

        fn query_resource(&self, _resource: &LockResource) -> Option<LockMode> {
            None
        }

        fn reset(&mut self) -> Result<(), LockError> {
            Ok(())
        }

        fn fin(&mut self) {}

        fn supports_blocking(&self) -> bool {
            self.blocking
        }
    }

    fn setup(blocking: bool) -> (LockManager, Recording, MetadataCache) {
        let recording = Recording {
            blocking,
            ..Recording::default()
        };
        let manager = LockManager::new(Box::new(recording.clone()));
        let cache = MetadataCache::new(&[FormatName::new("lvm2").unwrap()], "local");
        (manager, recording, cache)
    }

    fn vg(name: &str) -> LockResource {
        LockResource::Vg(VgName::new(name).unwrap())
    }

    #[test]
    fn second_vg_write_lock_never_waits() {
        let (mut manager, recording, mut cache) = setup(true);

        manager.acquire(&mut cache, &vg("a"), LockMode::Write).unwrap();
        manager.acquire(&mut cache, &vg("b"), LockMode::Write).unwrap();

        let calls = recording.calls.lock().unwrap();
        assert!(!calls[0].2.non_blocking);
        assert!(calls[1].2.non_blocking);
    }

    #[test]
    fn global_does_not_count_as_vg() {
        let (mut manager, recording, mut cache) = setup(true);

        manager
            .acquire(&mut cache, &LockResource::Global, LockMode::Write)
            .unwrap();
        manager.acquire(&mut cache, &vg("a"), LockMode::Write).unwrap();

        let calls = recording.calls.lock().unwrap();
        assert!(!calls[1].2.non_blocking);
        assert_eq!(cache.locks().vgs_locked(), 1);
    }

    #[test]
    fn nested_lock_is_internal_and_changes_nothing() {
        let (mut manager, recording, mut cache) = setup(true);

        manager.acquire(&mut cache, &vg("a"), LockMode::Read).unwrap();
        let err = manager
            .acquire(&mut cache, &vg("a"), LockMode::Read)
            .unwrap_err();
        assert!(err.is_internal());
        assert_eq!(recording.calls.lock().unwrap().len(), 1);
        assert_eq!(cache.locks().mode(&vg("a")), Some(LockMode::Read));
    }

    #[test]
    fn mode_change_converts() {
        let (mut manager, recording, mut cache) = setup(true);

        manager.acquire(&mut cache, &vg("a"), LockMode::Read).unwrap();
        manager.acquire(&mut cache, &vg("a"), LockMode::Write).unwrap();
        assert_eq!(cache.locks().mode(&vg("a")), Some(LockMode::Write));
        assert_eq!(recording.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn out_of_order_request_is_refused_before_backend() {
        let (mut manager, recording, mut cache) = setup(true);

        manager.acquire(&mut cache, &vg("b"), LockMode::Read).unwrap();
        let err = manager
            .acquire(&mut cache, &vg("a"), LockMode::Read)
            .unwrap_err();
        assert!(matches!(
            err,
            LockError::Internal(InternalLockError::LockOrder { .. })
        ));
        assert_eq!(recording.calls.lock().unwrap().len(), 1);

        // orphans sort last, global may come any time
        manager
            .acquire(&mut cache, &LockResource::Orphans, LockMode::Write)
            .unwrap();
        manager
            .acquire(&mut cache, &LockResource::Global, LockMode::Read)
            .unwrap();
    }

    #[test]
    fn unlock_of_unheld_still_reaches_backend() {
        let (mut manager, recording, mut cache) = setup(true);

        manager.release(&mut cache, &vg("a")).unwrap();
        assert_eq!(recording.calls.lock().unwrap()[0].1, LockMode::Unlock);
    }

    #[test]
    fn cache_only_skips_backend() {
        let (mut manager, recording, mut cache) = setup(true);

        manager
            .lock_vol(&mut cache, &vg("a"), LockMode::Write, LockFlags::cache_only())
            .unwrap();
        assert!(recording.calls.lock().unwrap().is_empty());
        assert!(cache.locks().is_held(&vg("a")));
    }

    #[test]
    fn backend_without_blocking_gets_non_blocking_requests() {
        let (mut manager, recording, mut cache) = setup(false);

        manager.acquire(&mut cache, &vg("a"), LockMode::Read).unwrap();
        assert!(recording.calls.lock().unwrap()[0].2.non_blocking);
    }

    #[test]
    fn unlock_all_releases_in_reverse_order() {
        let (mut manager, recording, mut cache) = setup(true);

        manager
            .acquire(&mut cache, &LockResource::Global, LockMode::Write)
            .unwrap();
        manager.acquire(&mut cache, &vg("a"), LockMode::Write).unwrap();
        manager
            .acquire(&mut cache, &LockResource::Orphans, LockMode::Write)
            .unwrap();
        manager.unlock_all(&mut cache).unwrap();

        assert!(cache.locks().is_empty());
        let calls = recording.calls.lock().unwrap();
        let released: Vec<&LockResource> = calls[3..].iter().map(|(r, _, _)| r).collect();
        assert_eq!(released, vec![&LockResource::Orphans, &vg("a"), &LockResource::Global]);
    }

    #[test]
    fn reset_forgets_cache_state() {
        let (mut manager, _recording, mut cache) = setup(true);

        manager.acquire(&mut cache, &vg("a"), LockMode::Write).unwrap();
        manager.reset(&mut cache).unwrap();
        assert!(cache.locks().is_empty());
    }
}
