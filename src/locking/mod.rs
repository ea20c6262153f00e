//! locking
//!
//! Named advisory locks over volume groups and reserved resources.
//!
//! # Architecture
//!
//! - [`LockTable`] records what this process holds. It lives inside the
//!   metadata cache, because cache trust depends on lock state.
//! - [`LockBackend`] talks to whatever actually arbitrates between
//!   processes: lock files, a cluster manager, or nothing at all.
//! - [`LockManager`] enforces the per-process rules on top: lock order,
//!   nesting, and the non-blocking downgrade that keeps a process from
//!   ever waiting on a second volume group while it holds one.
//!
//! # Invariants
//!
//! - At most one blocking wait is outstanding per process
//! - Every orphan pseudo-group shares one resource
//! - The global resource is not counted as a held volume group

pub mod backend;
pub mod manager;
pub mod table;

pub use backend::{backend_from_config, FileLocking, LockBackend, NoLocking, ReadOnlyLocking};
pub use manager::LockManager;
pub use table::LockTable;

use std::fmt;

use thiserror::Error;

use crate::core::types::LockResource;

/// Requested lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared.
    Read,
    /// Exclusive.
    Write,
    /// Release.
    Unlock,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockMode::Read => "read",
            LockMode::Write => "write",
            LockMode::Unlock => "unlock",
        };
        f.write_str(name)
    }
}

/// Modifiers for a lock request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockFlags {
    /// Fail immediately instead of waiting.
    pub non_blocking: bool,
    /// Only update cache lock state; the backend is not contacted.
    pub cache_only: bool,
}

impl LockFlags {
    /// Flags for a non-blocking request.
    pub fn non_blocking() -> Self {
        Self {
            non_blocking: true,
            ..Self::default()
        }
    }

    /// Flags for a cache-only request.
    pub fn cache_only() -> Self {
        Self {
            cache_only: true,
            ..Self::default()
        }
    }
}

/// Programming errors in lock usage.
///
/// These are reported loudly but leave lock state exactly as it was, so a
/// caller may choose to log and carry on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalLockError {
    #[error("nested locking attempted on {resource}")]
    Nested { resource: LockResource },

    #[error("lock {requested} must be requested before {held}, not after")]
    LockOrder {
        requested: LockResource,
        held: LockResource,
    },
}

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds a conflicting lock and we may not wait.
    #[error("{resource} is locked by another process")]
    WouldBlock { resource: LockResource },

    /// The active backend does not permit the requested mode.
    #[error("cannot take {mode} lock on {resource}: {reason}")]
    Refused {
        resource: LockResource,
        mode: LockMode,
        reason: String,
    },

    /// Failed to create the lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// The backend failed for a reason other than contention.
    #[error("failed to {action} {resource}: {message}")]
    Backend {
        action: &'static str,
        resource: LockResource,
        message: String,
    },

    #[error("internal error: {0}")]
    Internal(#[from] InternalLockError),
}

impl LockError {
    /// Whether this is a lock-usage bug rather than a refusal.
    pub fn is_internal(&self) -> bool {
        matches!(self, LockError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::VgName;

    #[test]
    fn internal_errors_are_distinguished() {
        let nested: LockError = InternalLockError::Nested {
            resource: LockResource::Global,
        }
        .into();
        assert!(nested.is_internal());
        assert!(nested.to_string().starts_with("internal error:"));

        let blocked = LockError::WouldBlock {
            resource: LockResource::Vg(VgName::new("vg0").unwrap()),
        };
        assert!(!blocked.is_internal());
        assert!(blocked.to_string().contains("vg0"));
    }

    #[test]
    fn flag_constructors() {
        assert!(LockFlags::non_blocking().non_blocking);
        assert!(!LockFlags::non_blocking().cache_only);
        assert!(LockFlags::cache_only().cache_only);
        assert_eq!(LockFlags::default(), LockFlags {
            non_blocking: false,
            cache_only: false
        });
    }
}
