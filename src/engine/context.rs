//! engine::context
//!
//! The per-process context object.

use tracing::{debug, warn};

use crate::archive::{ArchiveParams, BackupParams};
use crate::cache::{MetadataCache, ScanLevel, ScanSummary, SuspendState};
use crate::core::config::Config;
use crate::core::interrupt::Interrupt;
use crate::core::metadata::VolumeGroup;
use crate::core::types::LockResource;
use crate::device::LabelRegistry;
use crate::format::{FormatInstance, FormatRegistry};
use crate::locking::{LockFlags, LockManager, LockMode};

use super::EngineError;

/// What the running command declares it can cope with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    /// Reads and writes are allowed with physical volumes missing.
    pub handles_missing_pvs: bool,
    /// Writes are allowed with segment types this tool doesn't know.
    pub handles_unknown_segments: bool,
    /// The command is the one that resumes or aborts an extent move.
    pub move_in_progress: bool,
    /// Simulation mode: nothing is written to metadata areas, archives or
    /// backups.
    pub test_mode: bool,
}

/// A group read through the engine, with the metadata areas it was read
/// from.
#[derive(Debug)]
pub struct VgHandle {
    pub vg: VolumeGroup,
    /// Every area agreed.
    pub consistent: bool,
    pub(crate) instance: FormatInstance,
}

impl VgHandle {
    /// Pair a document with its areas.
    pub fn new(vg: VolumeGroup, instance: FormatInstance) -> Self {
        Self {
            vg,
            consistent: true,
            instance,
        }
    }

    /// The metadata areas writes will go to.
    pub fn instance(&self) -> &FormatInstance {
        &self.instance
    }
}

/// Everything one process knows and holds.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub cache: MetadataCache,
    pub locking: LockManager,
    pub registry: Box<dyn LabelRegistry>,
    pub formats: FormatRegistry,
    pub archive: ArchiveParams,
    pub backup: BackupParams,
    pub interrupt: Interrupt,
    pub flags: CommandFlags,
}

impl Context {
    /// Assemble a context around an explicit lock manager.
    ///
    /// The host name comes from configuration, falling back to the
    /// system's.
    pub fn new(
        config: Config,
        locking: LockManager,
        registry: Box<dyn LabelRegistry>,
        formats: FormatRegistry,
    ) -> Self {
        let hostname = config
            .hostname()
            .map(str::to_string)
            .unwrap_or_else(local_hostname);
        let cache = MetadataCache::new(&formats.names(), hostname);
        let flags = CommandFlags {
            test_mode: config.test_mode(),
            ..CommandFlags::default()
        };

        debug!(
            locking = locking.backend_name(),
            formats = formats.names().len(),
            "context initialised"
        );

        Self {
            archive: ArchiveParams::from_config(&config),
            backup: BackupParams::from_config(&config),
            config,
            cache,
            locking,
            registry,
            formats,
            interrupt: Interrupt::new(),
            flags,
        }
    }

    /// Assemble a context using the lock backend configuration selects.
    pub fn from_config(
        config: Config,
        registry: Box<dyn LabelRegistry>,
        formats: FormatRegistry,
    ) -> Result<Self, EngineError> {
        let locking = LockManager::from_config(&config)?;
        Ok(Self::new(config, locking, registry, formats))
    }

    /// Replace the suspend oracle.
    pub fn with_suspend_state(mut self, suspend: Box<dyn SuspendState>) -> Self {
        self.cache.set_suspend_state(suspend);
        self
    }

    /// The host name used to rank same-named groups.
    pub fn hostname(&self) -> &str {
        self.cache.hostname()
    }

    /// Take a lock.
    pub fn lock(&mut self, resource: &LockResource, mode: LockMode) -> Result<(), EngineError> {
        self.lock_with(resource, mode, LockFlags::default())
    }

    /// Take a lock with explicit flags.
    pub fn lock_with(
        &mut self,
        resource: &LockResource,
        mode: LockMode,
        flags: LockFlags,
    ) -> Result<(), EngineError> {
        Ok(self.locking.lock_vol(&mut self.cache, resource, mode, flags)?)
    }

    /// Release a lock.
    pub fn unlock(&mut self, resource: &LockResource) -> Result<(), EngineError> {
        Ok(self.locking.release(&mut self.cache, resource)?)
    }

    /// Whether this process holds `resource` exclusively.
    pub fn holds_write_lock(&self, resource: &LockResource) -> bool {
        self.cache.locks().mode(resource) == Some(LockMode::Write)
    }

    /// Re-read labels.
    ///
    /// An interrupted scan is an error; what it did read stays cached.
    pub fn scan(&mut self, level: ScanLevel) -> Result<ScanSummary, EngineError> {
        let summary =
            self.cache
                .full_scan(self.registry.as_ref(), &self.formats, level, &self.interrupt)?;
        if summary.interrupted {
            return Err(EngineError::Interrupted);
        }
        Ok(summary)
    }

    /// Finish a top-level command: release every lock and lower the
    /// interrupt flag.
    pub fn end_command(&mut self) -> Result<(), EngineError> {
        let released = self.locking.unlock_all(&mut self.cache);
        self.interrupt.reset();
        Ok(released?)
    }

    /// Drop every lock and forget cached state.
    pub fn reset(&mut self, retain_orphans: bool) -> Result<(), EngineError> {
        self.locking.reset(&mut self.cache)?;
        self.cache.reset(retain_orphans);
        Ok(())
    }
}

/// The system host name, or `localhost` if it cannot be read.
pub fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("cannot read host name: {}", e);
            "localhost".to_string()
        }
    }
}
