//! engine
//!
//! Reads and writes volume group metadata through the cache.
//!
//! # Architecture
//!
//! All per-process state lives in one [`Context`]: configuration, the
//! metadata cache (with its lock table), the lock manager, the device
//! registry, the format handlers and the interrupt flag. Every engine
//! operation is a method on it.
//!
//! # Read
//!
//! ```text
//! orphan? -> synthesize from cache
//! cache hit? -> done
//! find format (revalidate, scan 1, scan 2)
//! read every area -> highest seqno wins -> membership check
//!     mismatch -> scan 2 -> read again, collecting every PV seen
//! inconsistent -> fail | tolerate | heal
//! ```
//!
//! # Write
//!
//! [`Context::vg_write`] must be followed by either [`Context::vg_commit`]
//! or [`Context::vg_revert`]. A write lands on every area or on none; a
//! commit that leaves the outcome unclear wipes the cached copy.

pub mod context;
pub mod read;
pub mod write;

pub use context::{local_hostname, CommandFlags, Context, VgHandle};
pub use read::ReadOptions;

pub use crate::core::interrupt::Interrupt;

use thiserror::Error;

use crate::cache::CacheError;
use crate::core::config::ConfigError;
use crate::core::metadata::MetadataError;
use crate::core::types::VgName;
use crate::device::RegistryError;
use crate::format::FormatError;
use crate::locking::LockError;

/// Engine-usage bugs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalEngineError {
    #[error("precommitted metadata requested for orphan group {vg}")]
    OrphanPrecommitted { vg: VgName },

    #[error("attempt to commit metadata for {vg} without a write lock")]
    CommitWithoutLock { vg: VgName },
}

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("volume group \"{0}\" not found")]
    VgNotFound(VgName),

    #[error("volume group {vg} metadata is inconsistent")]
    Inconsistent { vg: VgName },

    #[error("cannot process volume group {vg}: {count} physical volume(s) missing")]
    MissingPvs { vg: VgName, count: usize },

    #[error("volume group {0} has an interrupted extent move")]
    MoveInProgress(VgName),

    #[error("cannot update partial volume group {0}")]
    PartialVg(VgName),

    #[error("cannot update volume group {0} with unknown segments in it")]
    UnknownSegments(VgName),

    #[error("volume group {0} has no metadata areas")]
    NoMetadataAreas(VgName),

    #[error("failed to write metadata for {vg}: {source}")]
    WriteFailed {
        vg: VgName,
        #[source]
        source: FormatError,
    },

    #[error("failed to precommit metadata for {vg}: {source}")]
    PrecommitFailed {
        vg: VgName,
        #[source]
        source: FormatError,
    },

    #[error("failed to commit metadata for {vg} to any metadata area")]
    CommitFailed { vg: VgName },

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(#[from] InternalEngineError),
}

impl EngineError {
    /// Whether this is an engine, lock or cache usage bug.
    pub fn is_internal(&self) -> bool {
        match self {
            EngineError::Internal(_) => true,
            EngineError::Lock(e) => e.is_internal(),
            EngineError::Cache(e) => e.is_internal(),
            _ => false,
        }
    }

    /// What the user can do about it, where there is something.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            EngineError::MissingPvs { .. } => Some(
                "reconnect the missing devices, or use a command that handles missing physical volumes",
            ),
            EngineError::MoveInProgress(_) => {
                Some("restore the metadata from a backup or archive (vgc restore)")
            }
            EngineError::PartialVg(_) => {
                Some("remove the missing physical volumes from the group first")
            }
            EngineError::Inconsistent { .. } => {
                Some("rerun with write access so the metadata can be repaired")
            }
            EngineError::Lock(LockError::WouldBlock { .. }) => {
                Some("another command is using this volume group; try again")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vg0() -> VgName {
        VgName::new("vg0").unwrap()
    }

    #[test]
    fn hints_for_user_errors() {
        assert!(EngineError::MoveInProgress(vg0())
            .hint()
            .unwrap()
            .contains("restore"));
        assert!(EngineError::MissingPvs { vg: vg0(), count: 1 }.hint().is_some());
        assert!(EngineError::VgNotFound(vg0()).hint().is_none());
    }

    #[test]
    fn internal_errors_propagate_through_wrappers() {
        let nested: EngineError = LockError::Internal(crate::locking::InternalLockError::Nested {
            resource: crate::core::types::LockResource::Global,
        })
        .into();
        assert!(nested.is_internal());

        let commit: EngineError = InternalEngineError::CommitWithoutLock { vg: vg0() }.into();
        assert!(commit.is_internal());
        assert!(commit.to_string().starts_with("internal error:"));
        assert!(!EngineError::Interrupted.is_internal());
    }
}
