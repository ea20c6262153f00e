//! cache
//!
//! In-memory directory of volume groups and their devices.
//!
//! # Architecture
//!
//! The cache answers two questions without touching disk when it can:
//! which devices belong to which group, and what the group's metadata
//! currently says. It is owned by the per-process context and trusts the
//! lock manager's notifications about what this process holds.
//!
//! Groups are keyed by id in one map; a [`NameIndex`](index::NameIndex)
//! maps each name onto an ordered list of ids whose head is the primary.
//! Every format has an orphan pseudo-group that collects PVs belonging to
//! no real group.
//!
//! # Trust
//!
//! A device is trusted when its label was read since the last lock
//! transition on its group. Whenever a group's lock state crosses a
//! locked/unlocked boundary (and the global lock is not held
//! exclusively), its devices become untrusted and its cached metadata is
//! dropped. Cached metadata is only handed out while every member device
//! is trusted.
//!
//! # State machine
//!
//! ```text
//! device:  trusted --lock transition--> untrusted --label re-read--> trusted
//! blob:    absent --store--> committed | precommitted --drop/invalidate/corrupt--> absent
//! ```

pub mod index;
pub mod info;
mod scan;

pub use index::{NameIndex, Precedence};
pub use info::{CachedMetadata, DeviceInfo, VgInfo};
pub use scan::{ScanLevel, ScanSummary};

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::metadata::{parse_metadata, MetadataError, VolumeGroup};
use crate::core::types::{FormatName, LockResource, PvId, VgId, VgName};
use crate::device::{Device, Label, RegistryError, VgSummary};
use crate::locking::{LockMode, LockTable};

/// Cache-usage bugs. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalCacheError {
    #[error("metadata commit (or revert) missing before dropping metadata for {vg} from cache")]
    CommitMissing { vg: VgName },
}

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("device with PV id {0} is not in the cache")]
    UnknownDevice(PvId),

    #[error("device scan failed: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("internal error: {0}")]
    Internal(#[from] InternalCacheError),
}

impl CacheError {
    /// Whether this is a cache-usage bug rather than a real failure.
    pub fn is_internal(&self) -> bool {
        matches!(self, CacheError::Internal(_))
    }
}

/// Whether devices are currently suspended by an outside orchestrator.
///
/// While a critical section is active, precommitted metadata may already
/// be in effect on the devices, so the cache treats it as live.
pub trait SuspendState: fmt::Debug {
    /// Devices are suspended between preload and commit.
    fn in_critical_section(&self) -> bool;

    /// Memory is locked; disk scans must not be started.
    fn memory_locked(&self) -> bool {
        self.in_critical_section()
    }
}

/// A process that never suspends devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSuspended;

impl SuspendState for NeverSuspended {
    fn in_critical_section(&self) -> bool {
        false
    }
}

/// The metadata cache.
#[derive(Debug)]
pub struct MetadataCache {
    hostname: String,
    formats: Vec<FormatName>,
    devices: HashMap<PvId, DeviceInfo>,
    groups: HashMap<VgId, VgInfo>,
    names: NameIndex,
    locks: LockTable,
    suspend: Box<dyn SuspendState>,
    scanning: bool,
    scan_completed: bool,
}

impl MetadataCache {
    /// Create a cache with one orphan pseudo-group per format.
    ///
    /// `hostname` is the local host name used to rank same-named groups.
    pub fn new(formats: &[FormatName], hostname: impl Into<String>) -> Self {
        let mut cache = Self {
            hostname: hostname.into(),
            formats: Vec::new(),
            devices: HashMap::new(),
            groups: HashMap::new(),
            names: NameIndex::default(),
            locks: LockTable::new(),
            suspend: Box::new(NeverSuspended),
            scanning: false,
            scan_completed: false,
        };
        for format in formats {
            cache.ensure_orphan(format);
        }
        cache
    }

    /// Replace the suspend oracle.
    pub fn with_suspend_state(mut self, suspend: Box<dyn SuspendState>) -> Self {
        self.suspend = suspend;
        self
    }

    /// Replace the suspend oracle in place.
    pub fn set_suspend_state(&mut self, suspend: Box<dyn SuspendState>) {
        self.suspend = suspend;
    }

    /// Local host name.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Whether devices are suspended by an outside orchestrator.
    pub fn in_critical_section(&self) -> bool {
        self.suspend.in_critical_section()
    }

    /// Whether disk scans must be avoided.
    pub fn memory_locked(&self) -> bool {
        self.suspend.memory_locked()
    }

    /// Lock resources this process holds.
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Whether a level-2 scan has completed since the last reset.
    pub fn scan_completed(&self) -> bool {
        self.scan_completed
    }

    /// Tear everything down.
    ///
    /// With `retain_orphans`, orphan pseudo-groups and their devices are
    /// kept; everything else is forgotten. Lock state is kept either way,
    /// since the locks are still held.
    pub fn reset(&mut self, retain_orphans: bool) {
        for (resource, _) in self.locks.held() {
            if !resource.is_global() {
                error!(resource = %resource, "internal error: {} was not unlocked before cache reset", resource);
            }
        }

        if retain_orphans {
            self.groups.retain(|_, g| g.is_orphan());
            let groups = &self.groups;
            self.devices.retain(|_, d| groups.contains_key(&d.group));
            for group in self.groups.values_mut() {
                group.cached = None;
            }
            let mut names = NameIndex::default();
            for group in self.groups.values() {
                names.insert(group, None, &self.hostname);
            }
            self.names = names;
        } else {
            self.devices.clear();
            self.groups.clear();
            self.names.clear();
            for format in self.formats.clone() {
                self.insert_orphan(&format);
            }
        }
        self.scan_completed = false;
        debug!(retain_orphans, "metadata cache reset");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Look up a group by name, optionally pinned to an id.
    ///
    /// Without an id the primary for the name is returned.
    pub fn lookup_group_by_name(&self, name: &VgName, id: Option<&VgId>) -> Option<&VgInfo> {
        match id {
            Some(id) => self.groups.get(id).filter(|g| &g.name == name),
            None => self.names.primary(name).and_then(|id| self.groups.get(id)),
        }
    }

    /// Look up a group by id.
    pub fn lookup_group_by_id(&self, id: &VgId) -> Option<&VgInfo> {
        self.groups.get(id)
    }

    /// Look up a device by PV id.
    ///
    /// With `valid_only`, a device is returned only if it is trusted: its
    /// label was not invalidated, and either its group is not locked by
    /// this process or the device was read under that lock.
    pub fn lookup_device(&self, pv_id: &PvId, valid_only: bool) -> Option<&DeviceInfo> {
        self.devices
            .get(pv_id)
            .filter(|d| !valid_only || self.is_device_valid(d))
    }

    /// Whether a cached device can be trusted.
    pub fn is_device_valid(&self, device: &DeviceInfo) -> bool {
        if device.invalid {
            return false;
        }
        match self.groups.get(&device.group) {
            // An unlocked group's owner would invalidate us on change
            Some(group) if !self.locks.is_vg_locked(&group.name) => true,
            _ => device.locked,
        }
    }

    fn group_is_valid(&self, group: &VgInfo) -> bool {
        group
            .devices
            .iter()
            .filter_map(|pv| self.devices.get(pv))
            .all(|d| self.is_device_valid(d))
    }

    fn group_is_invalid(&self, group: &VgInfo) -> bool {
        group
            .devices
            .iter()
            .filter_map(|pv| self.devices.get(pv))
            .all(|d| d.invalid)
    }

    /// All group names, orphans last.
    pub fn vg_names(&self) -> Vec<VgName> {
        self.names.names()
    }

    /// All group ids, orphans last.
    pub fn vg_ids(&self) -> Vec<VgId> {
        self.names.all_ids()
    }

    /// PV ids of a group's member devices.
    pub fn pv_ids_in_group(&self, name: &VgName, id: Option<&VgId>) -> Option<Vec<PvId>> {
        self.lookup_group_by_name(name, id)
            .map(|g| g.devices.iter().cloned().collect())
    }

    /// Format owning a group.
    pub fn fmt_for_group(&self, name: &VgName, id: Option<&VgId>) -> Option<FormatName> {
        self.lookup_group_by_name(name, id).map(|g| g.format.clone())
    }

    /// Name of the group with this id.
    pub fn vg_name_for_id(&self, id: &VgId) -> Option<&VgName> {
        self.groups.get(id).map(|g| &g.name)
    }

    /// The orphan pseudo-group for a format.
    pub fn orphan_group(&self, format: &FormatName) -> Option<&VgInfo> {
        self.groups.get(&VgId::orphan(format))
    }

    /// Every orphan pseudo-group.
    pub fn orphan_groups(&self) -> impl Iterator<Item = &VgInfo> {
        self.groups.values().filter(|g| g.is_orphan())
    }

    /// Every cached device.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values()
    }

    /// Cached device for a device path.
    pub fn device_at_path(&self, path: &std::path::Path) -> Option<&DeviceInfo> {
        self.devices.values().find(|d| d.device.path == path)
    }

    /// Formats this cache keeps orphan groups for.
    pub fn formats(&self) -> &[FormatName] {
        &self.formats
    }

    // =========================================================================
    // Device membership
    // =========================================================================

    /// Register a device from a freshly read label.
    ///
    /// Returns `None` if the device was ignored as a redundant path to a PV
    /// already seen on a layered device.
    pub fn add_device(&mut self, device: Device, label: &Label) -> Option<&DeviceInfo> {
        self.ensure_orphan(&label.format);

        // The path used to carry a different PV
        let stale = self
            .devices
            .values()
            .find(|d| d.device.path == device.path && d.pv_id != label.pv_id)
            .map(|d| d.pv_id.clone());
        if let Some(stale) = stale {
            debug!(pv = %stale, device = %device, "device now carries a different PV");
            self.remove_device(&stale);
        }

        let pv_id = label.pv_id.clone();
        match self.devices.get_mut(&pv_id) {
            Some(existing) if existing.device != device => {
                if existing.device.layered && !device.layered {
                    info!(
                        "ignoring duplicate PV {} on {} - using layered {}",
                        pv_id, device, existing.device
                    );
                    return None;
                }
                if !existing.device.layered && device.layered {
                    info!(
                        "duplicate PV {} on {} - using layered {}",
                        pv_id, existing.device, device
                    );
                } else {
                    warn!(
                        "found duplicate PV {}: using {} not {}",
                        pv_id, device, existing.device
                    );
                }
                existing.device = device;
            }
            Some(_) => {}
            None => {
                let orphan = VgId::orphan(&label.format);
                let info = DeviceInfo::from_label(device, label, orphan.clone());
                self.devices.insert(pv_id.clone(), info);
                self.attach(&pv_id, &orphan);
            }
        }

        if let Some(info) = self.devices.get_mut(&pv_id) {
            info.label_sector = label.sector;
            info.size = label.size;
            info.mda_count = label.mda_count;
            info.invalid = false;
            if info.format != label.format {
                info.format = label.format.clone();
                let orphan = VgId::orphan(&label.format);
                self.detach(&pv_id);
                self.attach(&pv_id, &orphan);
            }
        }

        self.rehome(&pv_id, label.vg.as_ref());
        self.devices.get(&pv_id)
    }

    /// Move a device into the group named by `summary`, or into its
    /// format's orphan group when `summary` is `None`.
    ///
    /// Creates the group if it is not yet known.
    pub fn update_group_name_and_id(
        &mut self,
        pv_id: &PvId,
        summary: Option<&VgSummary>,
    ) -> Result<(), CacheError> {
        if !self.devices.contains_key(pv_id) {
            return Err(CacheError::UnknownDevice(pv_id.clone()));
        }
        self.rehome(pv_id, summary);
        Ok(())
    }

    /// Detach and forget a device. A real group losing its last device is
    /// destroyed.
    pub fn remove_device(&mut self, pv_id: &PvId) -> Option<DeviceInfo> {
        if !self.devices.contains_key(pv_id) {
            return None;
        }
        self.detach(pv_id);
        self.devices.remove(pv_id)
    }

    fn rehome(&mut self, pv_id: &PvId, summary: Option<&VgSummary>) {
        let Some(info) = self.devices.get(pv_id) else {
            return;
        };
        let format = info.format.clone();
        let current = info.group.clone();
        let has_mdas = info.has_metadata_areas();

        let summary = summary.filter(|s| !s.name.is_orphan() && !s.id.is_orphan());
        let Some(summary) = summary else {
            // A PV without metadata areas learns its group from other PVs;
            // don't lose that while devices are suspended
            if !current.is_orphan() && !has_mdas && self.suspend.in_critical_section() {
                return;
            }
            let orphan = VgId::orphan(&format);
            if current != orphan {
                self.detach(pv_id);
                self.attach(pv_id, &orphan);
                debug!(pv = %pv_id, "now an orphan");
            }
            return;
        };

        if let Some(info) = self.devices.get_mut(pv_id) {
            info.invalid = false;
        }

        if current != summary.id {
            self.detach(pv_id);
            self.ensure_group(summary, &format);
            self.attach(pv_id, &summary.id);
            debug!(pv = %pv_id, vg = %summary.name, id = %summary.id, "now in VG");
        } else {
            self.ensure_group(summary, &format);
        }
    }

    fn ensure_orphan(&mut self, format: &FormatName) {
        if !self.formats.contains(format) {
            self.formats.push(format.clone());
            self.insert_orphan(format);
        }
    }

    fn insert_orphan(&mut self, format: &FormatName) {
        let orphan = VgInfo::orphan(format);
        if !self.groups.contains_key(&orphan.id) {
            self.names.insert(&orphan, None, &self.hostname);
            self.groups.insert(orphan.id.clone(), orphan);
        }
    }

    /// Make sure a group with the summary's name and id exists and carries
    /// its status and creation host.
    ///
    /// Attributes are applied before the record is indexed by name, since
    /// they decide which same-named record is primary.
    fn ensure_group(&mut self, summary: &VgSummary, format: &FormatName) {
        let name = &summary.name;
        let id = &summary.id;
        if let Some(existing) = self.groups.get_mut(id) {
            existing.status = summary.status.clone();
            if summary.creation_host.is_some() {
                existing.creation_host = summary.creation_host.clone();
            }
            if &existing.name != name {
                self.rename_group(id, name);
            }
            return;
        }

        // A stale same-name record left over from before this scan would
        // only produce bogus duplicate warnings
        while self.scanning {
            let Some(primary) = self.names.primary(name).cloned() else {
                break;
            };
            let stale = self
                .groups
                .get(&primary)
                .is_some_and(|group| self.group_is_invalid(group));
            if !stale {
                break;
            }
            self.dissolve(&primary);
        }

        let mut group = VgInfo::new(name.clone(), id.clone(), format.clone());
        group.status = summary.status.clone();
        group.creation_host = summary.creation_host.clone();
        let primary = self.names.primary(name).and_then(|p| self.groups.get(p));
        self.names.insert(&group, primary, &self.hostname);
        self.groups.insert(id.clone(), group);
    }

    fn rename_group(&mut self, id: &VgId, new_name: &VgName) {
        let Some(group) = self.groups.get(id) else {
            return;
        };
        let old_name = group.name.clone();
        self.names.remove(&old_name, id);

        let primary = self.names.primary(new_name).and_then(|p| self.groups.get(p));
        let mut renamed = group.clone();
        renamed.name = new_name.clone();
        self.names.insert(&renamed, primary, &self.hostname);
        self.groups.insert(id.clone(), renamed);
        info!(id = %id, "VG {} renamed to {}", old_name, new_name);
    }

    /// Hand every device of a group to its orphan group and forget it.
    fn dissolve(&mut self, id: &VgId) {
        let Some(group) = self.groups.remove(id) else {
            return;
        };
        self.names.remove(&group.name, id);
        for pv in &group.devices {
            if let Some(info) = self.devices.get(pv) {
                let orphan = VgId::orphan(&info.format);
                self.attach(pv, &orphan);
            }
        }
        debug!(vg = %group.name, id = %id, "dissolved invalid VG record");
    }

    fn attach(&mut self, pv_id: &PvId, group_id: &VgId) {
        let Some(group) = self.groups.get_mut(group_id) else {
            return;
        };
        group.devices.insert(pv_id.clone());
        let locked = self.locks.is_vg_locked(&group.name);
        if let Some(info) = self.devices.get_mut(pv_id) {
            info.group = group_id.clone();
            info.locked = locked;
        }
    }

    fn detach(&mut self, pv_id: &PvId) {
        let Some(group_id) = self.devices.get(pv_id).map(|d| d.group.clone()) else {
            return;
        };
        let destroy = match self.groups.get_mut(&group_id) {
            Some(group) => {
                group.devices.remove(pv_id);
                !group.is_orphan() && group.devices.is_empty()
            }
            None => false,
        };
        if destroy {
            if let Some(group) = self.groups.remove(&group_id) {
                self.names.remove(&group.name, &group_id);
                debug!(vg = %group.name, "last device detached; VG forgotten");
            }
        }
    }

    // =========================================================================
    // Cached metadata
    // =========================================================================

    /// Cached metadata for a group, if it can be trusted.
    ///
    /// Misses when nothing is cached, when any member device is untrusted,
    /// when precommitted metadata is wanted but only committed is held, or
    /// when committed metadata is wanted while precommitted is held and no
    /// critical section makes it live. A blob that fails its checksum or
    /// no longer parses is discarded.
    pub fn get_cached_group(&mut self, id: &VgId, precommitted: bool) -> Option<VolumeGroup> {
        let group = self.groups.get(id)?;
        let cached = group.cached.as_ref()?;

        if !self.group_is_valid(group) {
            return None;
        }
        if precommitted && !cached.precommitted {
            return None;
        }
        if !precommitted && cached.precommitted && !self.suspend.in_critical_section() {
            return None;
        }

        let parsed = if cached.is_intact() {
            parse_metadata(&cached.blob).map_err(|e| e.to_string())
        } else {
            Err("checksum mismatch".to_string())
        };
        match parsed {
            Ok(vg) if &vg.id == id => {
                debug!(
                    vg = %group.name,
                    "using cached {}metadata",
                    if cached.precommitted { "precommitted " } else { "" }
                );
                Some(vg)
            }
            Ok(_) => {
                self.discard_blob(id, "document id does not match");
                None
            }
            Err(reason) => {
                self.discard_blob(id, &reason);
                None
            }
        }
    }

    fn discard_blob(&mut self, id: &VgId, reason: &str) {
        if let Some(group) = self.groups.get_mut(id) {
            group.cached = None;
            warn!(vg = %group.name, "discarding cached metadata: {}", reason);
        }
    }

    /// Cache a group's metadata.
    ///
    /// Every listed PV the cache knows is re-homed into the group and
    /// trusted.
    pub fn store_metadata(&mut self, vg: &VolumeGroup, precommitted: bool) -> Result<(), CacheError> {
        let summary = VgSummary {
            name: vg.name.clone(),
            id: vg.id.clone(),
            status: vg.status.clone(),
            creation_host: vg.creation_host.clone(),
        };
        for pv in &vg.pvs {
            if self.devices.contains_key(&pv.id) {
                self.rehome(&pv.id, Some(&summary));
            }
        }

        let blob = vg.to_canonical_json()?;
        let Some(group) = self.groups.get_mut(&vg.id) else {
            debug!(vg = %vg.name, "no cached devices; metadata not stored");
            return Ok(());
        };
        debug!(
            vg = %vg.name,
            id = %vg.id,
            bytes = blob.len(),
            precommitted,
            "metadata cache: stored"
        );
        group.cached = Some(CachedMetadata::new(blob, precommitted));
        Ok(())
    }

    /// Discard cached metadata for every group with this name.
    ///
    /// For an orphan name every format's orphan group is dropped and a new
    /// full scan becomes necessary. Otherwise each same-named record goes
    /// through [`MetadataCache::drop_group_metadata`].
    pub fn drop_metadata(&mut self, name: &VgName, drop_precommitted: bool) -> Result<(), CacheError> {
        if name.is_orphan() {
            let orphans: Vec<VgId> = self.orphan_groups().map(|g| g.id.clone()).collect();
            for id in orphans {
                self.invalidate_group(&id);
                if let Some(group) = self.groups.get_mut(&id) {
                    group.cached = None;
                }
            }
            self.scan_completed = false;
            debug!("dropped orphan metadata; full scan required");
            return Ok(());
        }

        let mut result = Ok(());
        for id in self.names.ids(name).to_vec() {
            if let Err(e) = self.drop_group_metadata(&id, drop_precommitted) {
                result = Err(e);
            }
        }
        result
    }

    /// Discard cached metadata for one group.
    ///
    /// Nothing happens while the global lock is held exclusively. Dropping
    /// committed-path metadata while precommitted metadata is pending drops
    /// it anyway but reports the missing commit or revert.
    pub fn drop_group_metadata(&mut self, id: &VgId, drop_precommitted: bool) -> Result<(), CacheError> {
        if self.locks.global_exclusive() {
            debug!(id = %id, "global lock held; keeping cached metadata");
            return Ok(());
        }

        let Some(group) = self.groups.get(id) else {
            return Ok(());
        };
        let name = group.name.clone();
        let pending = group.is_precommitted();

        // Only precommitted metadata changed, so the labels still hold
        if !pending || drop_precommitted {
            self.invalidate_group(id);
        }
        if let Some(group) = self.groups.get_mut(id) {
            group.cached = None;
        }

        if pending && !drop_precommitted {
            let err = InternalCacheError::CommitMissing { vg: name };
            error!("internal error: {}", err);
            return Err(err.into());
        }
        Ok(())
    }

    fn invalidate_group(&mut self, id: &VgId) {
        let Some(group) = self.groups.get(id) else {
            return;
        };
        for pv in &group.devices {
            if let Some(info) = self.devices.get_mut(pv) {
                info.invalid = true;
            }
        }
    }

    // =========================================================================
    // Lock notifications
    // =========================================================================

    /// Record a lock transition made by the lock manager.
    pub fn record_lock(&mut self, resource: &LockResource, mode: LockMode) {
        match mode {
            LockMode::Unlock => {
                self.locks.remove(resource);
                self.update_lock_state(resource, false);
            }
            mode => {
                let was_held = self.locks.insert(resource.clone(), mode).is_some();
                if !was_held {
                    self.update_lock_state(resource, true);
                }
            }
        }
    }

    fn update_lock_state(&mut self, resource: &LockResource, locked: bool) {
        if resource.is_global() {
            return;
        }
        let global = self.locks.global_exclusive();
        for group in self.groups.values_mut() {
            if !resource.covers(&group.name) {
                continue;
            }
            let mut still_valid = true;
            for pv in &group.devices {
                let Some(info) = self.devices.get_mut(pv) else {
                    continue;
                };
                if !global && info.locked != locked {
                    info.invalid = true;
                    still_valid = false;
                }
                info.locked = locked;
            }
            if !still_valid && group.cached.take().is_some() {
                debug!(vg = %group.name, locked, "lock state changed; cached metadata dropped");
            }
        }
    }
}
