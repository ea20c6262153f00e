//! cache::index
//!
//! Name index over volume groups.
//!
//! Several groups may share a name (two disks moved in from different
//! hosts, say). Every name maps to an ordered list of group ids; the first
//! entry is the primary, which is what a name-only lookup returns. The
//! others stay reachable by id.

use std::collections::BTreeMap;

use tracing::warn;

use crate::core::metadata::VgStatus;
use crate::core::types::{VgId, VgName};

use super::info::VgInfo;

/// Why a new group did or did not displace the primary for its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    /// Incumbent is not exported; newcomer is.
    KeepUnexported,
    /// Incumbent is exported; newcomer is not.
    NewUnexported,
    /// Incumbent was created on this host.
    KeepCreatedHere,
    /// Incumbent has no creation host; newcomer has one.
    NewHasCreationHost,
    /// Newcomer was created on this host.
    NewCreatedHere,
    /// Nothing distinguishes them; first seen stays primary.
    KeepIncumbent,
}

impl Precedence {
    /// Whether the newcomer becomes primary.
    pub fn new_wins(self) -> bool {
        matches!(
            self,
            Precedence::NewUnexported | Precedence::NewHasCreationHost | Precedence::NewCreatedHere
        )
    }
}

/// Decide whether a newcomer displaces the primary.
pub fn precedence(
    primary: &VgInfo,
    new_status: &VgStatus,
    new_host: Option<&str>,
    local_host: &str,
) -> Precedence {
    let primary_host = primary.creation_host.as_deref();
    if !primary.status.exported && new_status.exported {
        Precedence::KeepUnexported
    } else if primary.status.exported && !new_status.exported {
        Precedence::NewUnexported
    } else if primary_host == Some(local_host) {
        Precedence::KeepCreatedHere
    } else if primary_host.is_none() && new_host.is_some() {
        Precedence::NewHasCreationHost
    } else if new_host == Some(local_host) {
        Precedence::NewCreatedHere
    } else {
        Precedence::KeepIncumbent
    }
}

/// Ordered same-name lists keyed by name.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    by_name: BTreeMap<VgName, Vec<VgId>>,
}

impl NameIndex {
    /// The primary group for a name.
    pub fn primary(&self, name: &VgName) -> Option<&VgId> {
        self.by_name.get(name).and_then(|ids| ids.first())
    }

    /// Every group with this name, primary first.
    pub fn ids(&self, name: &VgName) -> &[VgId] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// Whether `id` is registered under `name`.
    pub fn contains(&self, name: &VgName, id: &VgId) -> bool {
        self.ids(name).contains(id)
    }

    /// Insert a new group under its name.
    ///
    /// `primary` is the current primary for the name, if there is one.
    /// Returns whether the new group became primary.
    pub fn insert(&mut self, new: &VgInfo, primary: Option<&VgInfo>, local_host: &str) -> bool {
        let Some(primary) = primary else {
            self.by_name.insert(new.name.clone(), vec![new.id.clone()]);
            return true;
        };

        let decision = precedence(
            primary,
            &new.status,
            new.creation_host.as_deref(),
            local_host,
        );
        match decision {
            Precedence::KeepUnexported => warn!(
                vg = %new.name,
                "duplicate VG name: existing {} takes precedence over exported {}",
                primary.id, new.id
            ),
            Precedence::NewUnexported => warn!(
                vg = %new.name,
                "duplicate VG name: {} takes precedence over exported {}",
                new.id, primary.id
            ),
            Precedence::KeepCreatedHere => warn!(
                vg = %new.name,
                "duplicate VG name: existing {} (created here) takes precedence over {}",
                primary.id, new.id
            ),
            Precedence::NewHasCreationHost => warn!(
                vg = %new.name,
                "duplicate VG name: {} (with creation_host) takes precedence over {}",
                new.id, primary.id
            ),
            Precedence::NewCreatedHere => warn!(
                vg = %new.name,
                "duplicate VG name: {} (created here) takes precedence over {}",
                new.id, primary.id
            ),
            Precedence::KeepIncumbent => warn!(
                vg = %new.name,
                "duplicate VG name: existing {} takes precedence over {}",
                primary.id, new.id
            ),
        }

        let ids = self.by_name.entry(new.name.clone()).or_default();
        if decision.new_wins() {
            ids.insert(0, new.id.clone());
        } else {
            ids.push(new.id.clone());
        }
        decision.new_wins()
    }

    /// Remove a group from a name's list.
    pub fn remove(&mut self, name: &VgName, id: &VgId) {
        if let Some(ids) = self.by_name.get_mut(name) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    /// All names, real groups alphabetically and orphans last.
    pub fn names(&self) -> Vec<VgName> {
        let (orphans, real): (Vec<_>, Vec<_>) =
            self.by_name.keys().cloned().partition(VgName::is_orphan);
        real.into_iter().chain(orphans).collect()
    }

    /// All ids, grouped by name in [`NameIndex::names`] order.
    pub fn all_ids(&self) -> Vec<VgId> {
        self.names()
            .iter()
            .flat_map(|name| self.ids(name).iter().cloned())
            .collect()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.by_name.clear();
    }
}
