//! locking::table
//!
//! Per-process record of held lock resources.

use std::collections::BTreeMap;

use crate::core::types::{LockResource, VgName};

use super::LockMode;

/// Resources currently held by this process and the mode they are held in.
///
/// Iteration follows the lock order, so the last held VG-scope entry is
/// the one every new request must sort after.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    held: BTreeMap<LockResource, LockMode>,
}

impl LockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode a resource is held in, if any.
    pub fn mode(&self, resource: &LockResource) -> Option<LockMode> {
        self.held.get(resource).copied()
    }

    /// Whether the resource is held in any mode.
    pub fn is_held(&self, resource: &LockResource) -> bool {
        self.held.contains_key(resource)
    }

    /// Whether the resource guarding `name` is held.
    pub fn is_vg_locked(&self, name: &VgName) -> bool {
        self.is_held(&LockResource::for_vg(name))
    }

    /// Whether the global resource is held exclusively.
    pub fn global_exclusive(&self) -> bool {
        self.mode(&LockResource::Global) == Some(LockMode::Write)
    }

    /// Number of held resources that guard volume groups.
    ///
    /// The global resource is not counted.
    pub fn vgs_locked(&self) -> usize {
        self.held.keys().filter(|r| r.is_vg_scope()).count()
    }

    /// Record a resource as held, returning the previous mode.
    pub fn insert(&mut self, resource: LockResource, mode: LockMode) -> Option<LockMode> {
        self.held.insert(resource, mode)
    }

    /// Forget a resource, returning the mode it was held in.
    pub fn remove(&mut self, resource: &LockResource) -> Option<LockMode> {
        self.held.remove(resource)
    }

    /// Held resources in lock order.
    pub fn held(&self) -> impl Iterator<Item = (&LockResource, LockMode)> {
        self.held.iter().map(|(r, m)| (r, *m))
    }

    /// First held VG-scope resource that `requested` may not follow.
    ///
    /// The global resource is exempt from ordering in both directions.
    pub fn order_conflict(&self, requested: &LockResource) -> Option<&LockResource> {
        if requested.is_global() {
            return None;
        }
        self.held
            .keys()
            .filter(|held| held.is_vg_scope() && *held != requested)
            .find(|held| *held > requested)
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.held.clear();
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
