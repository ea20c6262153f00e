//! engine::read
//!
//! The read protocol.
//!
//! A read either returns one self-consistent document or fails; partially
//! merged state is never handed out. Copies disagreeing with each other
//! are settled by sequence number, and the loser copies are rewritten
//! when the caller allows it.

use std::collections::BTreeSet;

use tracing::{debug, error, warn};

use crate::cache::ScanLevel;
use crate::core::metadata::{PhysicalVolume, VolumeGroup};
use crate::core::types::{FormatName, LockResource, PvId, VgId, VgName};
use crate::format::{FormatInstance, MetadataArea};
use crate::locking::LockMode;

use super::context::{Context, VgHandle};
use super::{EngineError, InternalEngineError};

/// How a read may behave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Read precommitted rather than committed metadata.
    pub precommitted: bool,
    /// Hand out the best copy even when copies disagree.
    pub tolerate_inconsistent: bool,
    /// Rewrite disagreeing copies. Needs the group's write lock.
    pub auto_heal: bool,
}

impl ReadOptions {
    /// Options for a command about to change the group.
    pub fn for_update() -> Self {
        Self {
            auto_heal: true,
            ..Self::default()
        }
    }

    /// Options for a reporting command.
    pub fn tolerant() -> Self {
        Self {
            tolerate_inconsistent: true,
            ..Self::default()
        }
    }
}

/// What reading every area of a group produced.
#[derive(Debug, Default)]
struct AreaCopies {
    /// Highest-seqno copy.
    candidate: Option<VolumeGroup>,
    /// Some area failed, held nothing, or disagreed.
    inconsistent: bool,
    /// Some copies carry different group ids.
    inconsistent_ids: bool,
    /// Every PV listed by any copy.
    all_pvs: BTreeSet<PvId>,
}

fn read_copies(areas: &[Box<dyn MetadataArea>], name: &VgName, precommitted: bool) -> AreaCopies {
    let mut copies = AreaCopies::default();
    for area in areas {
        let read = if precommitted {
            area.read_precommit(name)
        } else {
            area.read(name)
        };
        let vg = match read {
            Ok(Some(vg)) => vg,
            Ok(None) => {
                debug!(area = %area.describe(), "no metadata for {}", name);
                copies.inconsistent = true;
                continue;
            }
            Err(e) => {
                warn!("failed to read metadata for {}: {}", name, e);
                copies.inconsistent = true;
                continue;
            }
        };

        copies.all_pvs.extend(vg.pv_ids());
        match &copies.candidate {
            None => copies.candidate = Some(vg),
            Some(current) => {
                if current.id != vg.id {
                    copies.inconsistent_ids = true;
                }
                if *current != vg {
                    copies.inconsistent = true;
                }
                if vg.seqno > current.seqno {
                    copies.candidate = Some(vg);
                }
            }
        }
    }
    copies
}

/// A resolved candidate with everything needed to decide what to do.
struct Resolved {
    vg: VolumeGroup,
    instance: FormatInstance,
    precommitted: bool,
    inconsistent: bool,
    inconsistent_ids: bool,
    all_pvs: BTreeSet<PvId>,
}

impl Context {
    /// Read a volume group.
    ///
    /// `id` picks one of several same-named groups; without it the
    /// primary is read.
    ///
    /// # Errors
    ///
    /// - [`EngineError::VgNotFound`] when no readable copy exists
    /// - [`EngineError::Inconsistent`] when copies disagree and the options
    ///   allow neither tolerating nor repairing that
    /// - [`EngineError::MissingPvs`] and [`EngineError::MoveInProgress`]
    ///   when the group is unsafe for the running command
    pub fn vg_read(
        &mut self,
        name: &VgName,
        id: Option<&VgId>,
        options: ReadOptions,
    ) -> Result<VgHandle, EngineError> {
        if name.is_orphan() {
            return self.read_orphan(name, options);
        }

        let handle = match self.read_cached(name, id, options)? {
            Some(handle) => handle,
            None => self.read_from_areas(name, id, options)?,
        };
        self.check_usable(&handle.vg)?;
        Ok(handle)
    }

    /// Lock a group and read it, releasing the lock if the read fails.
    pub fn lock_and_read(
        &mut self,
        name: &VgName,
        mode: LockMode,
        options: ReadOptions,
    ) -> Result<VgHandle, EngineError> {
        let resource = LockResource::for_vg(name);
        self.lock(&resource, mode)?;
        match self.vg_read(name, None, options) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(unlock) = self.unlock(&resource) {
                    warn!("failed to unlock {}: {}", resource, unlock);
                }
                Err(e)
            }
        }
    }

    /// Metadata areas for a document's present PVs.
    pub fn instance_for(&self, vg: &VolumeGroup) -> Result<FormatInstance, EngineError> {
        let handler = self.formats.get(&vg.format)?;
        let members: Vec<PvId> = vg.present_pv_ids().into_iter().collect();
        Ok(handler.create_instance(&vg.name, Some(&vg.id), &members)?)
    }

    fn read_orphan(&mut self, name: &VgName, options: ReadOptions) -> Result<VgHandle, EngineError> {
        if options.precommitted {
            let err = InternalEngineError::OrphanPrecommitted { vg: name.clone() };
            error!("internal error: {}", err);
            return Err(err.into());
        }
        if !self.cache.memory_locked() {
            self.scan(ScanLevel::Quick)?;
        }

        let group = self
            .cache
            .lookup_group_by_name(name, None)
            .ok_or_else(|| EngineError::VgNotFound(name.clone()))?;
        let mut vg = VolumeGroup::new(name.clone(), group.id.clone(), group.format.clone(), 0);
        for pv in group.devices() {
            if let Some(info) = self.cache.lookup_device(pv, false) {
                vg.pvs
                    .push(PhysicalVolume::new(pv.clone(), info.device.path.clone(), 0, 0));
            }
        }

        let instance = FormatInstance::new(group.format.clone(), name.clone(), Vec::new());
        Ok(VgHandle::new(vg, instance))
    }

    fn read_cached(
        &mut self,
        name: &VgName,
        id: Option<&VgId>,
        options: ReadOptions,
    ) -> Result<Option<VgHandle>, EngineError> {
        let group_id = match id {
            Some(id) => id.clone(),
            None => match self.cache.lookup_group_by_name(name, None) {
                Some(group) => group.id.clone(),
                None => return Ok(None),
            },
        };
        let Some(vg) = self.cache.get_cached_group(&group_id, options.precommitted) else {
            return Ok(None);
        };
        if &vg.name != name {
            debug!(id = %group_id, "cached metadata is for {}, not {}", vg.name, name);
            return Ok(None);
        }

        let instance = self.instance_for(&vg)?;
        Ok(Some(VgHandle::new(vg, instance)))
    }

    fn find_format(&mut self, name: &VgName, id: Option<&VgId>) -> Result<FormatName, EngineError> {
        if let Some(format) = self.cache.revalidate_group(self.registry.as_ref(), name, id) {
            return Ok(format);
        }
        if self.cache.memory_locked() {
            debug!(vg = %name, "memory locked; not scanning for unknown VG");
            return Err(EngineError::VgNotFound(name.clone()));
        }

        self.scan(ScanLevel::Full)?;
        if let Some(format) = self.cache.fmt_for_group(name, id) {
            return Ok(format);
        }
        self.scan(ScanLevel::Refresh)?;
        self.cache
            .fmt_for_group(name, id)
            .ok_or_else(|| EngineError::VgNotFound(name.clone()))
    }

    fn members(&self, name: &VgName, id: Option<&VgId>) -> Vec<PvId> {
        self.cache.pv_ids_in_group(name, id).unwrap_or_default()
    }

    fn read_pass(
        &mut self,
        name: &VgName,
        id: Option<&VgId>,
        options: ReadOptions,
    ) -> Result<Option<(Resolved, Vec<PvId>)>, EngineError> {
        let format = self.find_format(name, id)?;
        let handler = self.formats.get(&format)?;
        let precommitted = options.precommitted && handler.supports_precommit();
        if options.precommitted && !precommitted {
            debug!(format = %format, "no precommit support; reading committed metadata");
        }

        let members = self.members(name, id);
        let instance = handler.create_instance(name, id, &members)?;
        let copies = read_copies(&instance.areas, name, precommitted);
        let Some(mut vg) = copies.candidate else {
            return Ok(None);
        };
        self.mark_missing(&mut vg);

        Ok(Some((
            Resolved {
                vg,
                instance,
                precommitted,
                inconsistent: copies.inconsistent,
                inconsistent_ids: copies.inconsistent_ids,
                all_pvs: copies.all_pvs,
            },
            members,
        )))
    }

    fn read_from_areas(
        &mut self,
        name: &VgName,
        id: Option<&VgId>,
        options: ReadOptions,
    ) -> Result<VgHandle, EngineError> {
        let mut resolved = None;
        match self.read_pass(name, id, options)? {
            Some((first, members)) if self.membership_matches(&first.vg, &members) => {
                resolved = Some(first);
            }
            Some((mut first, _)) if self.cache.memory_locked() => {
                warn!(vg = %name, "cached PV list does not match metadata");
                first.inconsistent = true;
                resolved = Some(first);
            }
            Some(_) => debug!(vg = %name, "cached PV list does not match metadata; rescanning"),
            None => debug!(vg = %name, "no usable metadata copy; rescanning"),
        }

        let resolved = match resolved {
            Some(resolved) => resolved,
            None => {
                if self.cache.memory_locked() {
                    return Err(EngineError::VgNotFound(name.clone()));
                }
                self.scan(ScanLevel::Refresh)?;
                match self.read_pass(name, id, options)? {
                    Some((second, _)) => second,
                    None => return Err(EngineError::VgNotFound(name.clone())),
                }
            }
        };

        if id.is_some_and(|id| id != &resolved.vg.id) {
            return Err(EngineError::VgNotFound(name.clone()));
        }

        if !resolved.inconsistent {
            self.cache
                .store_metadata(&resolved.vg, resolved.precommitted)?;
            return Ok(VgHandle::new(resolved.vg, resolved.instance));
        }
        self.settle_inconsistent(resolved, options)
    }

    fn settle_inconsistent(
        &mut self,
        resolved: Resolved,
        options: ReadOptions,
    ) -> Result<VgHandle, EngineError> {
        let name = resolved.vg.name.clone();

        if resolved.precommitted {
            warn!(vg = %name, "inconsistent pre-commit metadata copies");
            return Err(EngineError::Inconsistent { vg: name });
        }

        let healable = !resolved.inconsistent_ids;
        if resolved.inconsistent_ids {
            warn!(vg = %name, "metadata copies carry different VG ids");
        }

        if options.auto_heal && healable {
            return self.heal(resolved.vg, &resolved.all_pvs);
        }
        if options.tolerate_inconsistent {
            warn!(vg = %name, seqno = resolved.vg.seqno, "using inconsistent metadata");
            let mut handle = VgHandle::new(resolved.vg, resolved.instance);
            handle.consistent = false;
            return Ok(handle);
        }
        Err(EngineError::Inconsistent { vg: name })
    }

    /// Rewrite every copy with the winning document and orphan the PVs
    /// it no longer lists.
    fn heal(&mut self, vg: VolumeGroup, all_pvs: &BTreeSet<PvId>) -> Result<VgHandle, EngineError> {
        let resource = LockResource::for_vg(&vg.name);
        if !self.holds_write_lock(&resource) {
            warn!(vg = %vg.name, "cannot correct inconsistent metadata without a write lock");
            return Err(EngineError::Inconsistent { vg: vg.name });
        }
        warn!(
            "inconsistent metadata found for VG {} - updating to use version {}",
            vg.name, vg.seqno
        );

        let instance = self.instance_for(&vg)?;
        let mut handle = VgHandle::new(vg, instance);

        let saved = self.flags.handles_missing_pvs;
        self.flags.handles_missing_pvs = true;
        let written = self.vg_write(&mut handle);
        let repaired = match written {
            Ok(()) => match self.vg_commit(&mut handle) {
                Ok(()) => Ok(()),
                Err(e) => {
                    if let Err(revert) = self.vg_revert(&mut handle) {
                        warn!("failed to revert metadata for {}: {}", handle.vg.name, revert);
                    }
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };
        self.flags.handles_missing_pvs = saved;
        if let Err(e) = repaired {
            error!("automatic metadata correction failed for {}: {}", handle.vg.name, e);
            return Err(e);
        }

        let listed = handle.vg.pv_ids();
        for pv in all_pvs.difference(&listed) {
            if self.cache.lookup_device(pv, false).is_none() {
                continue;
            }
            warn!("removing PV {} that no longer belongs to VG {}", pv, handle.vg.name);
            self.orphan_pv(pv)?;
        }
        Ok(handle)
    }

    /// Flag PVs that no cached device carries.
    fn mark_missing(&self, vg: &mut VolumeGroup) {
        for pv in &mut vg.pvs {
            let present = self.cache.lookup_device(&pv.id, false).is_some();
            if !present && !pv.missing {
                warn!(vg = %vg.name, "couldn't find device with PV id {}", pv.id);
            }
            pv.missing = !present;
        }
    }

    /// Whether the document lists exactly the PVs the cache places in the
    /// group. A PV without metadata areas can only learn its group from
    /// this document, so finding it among the orphans is expected.
    fn membership_matches(&self, vg: &VolumeGroup, members: &[PvId]) -> bool {
        let members: BTreeSet<&PvId> = members.iter().collect();
        let listed = vg.present_pv_ids();

        for pv in &listed {
            if members.contains(pv) {
                continue;
            }
            match self.cache.lookup_device(pv, false) {
                Some(info) if info.group().is_orphan() && !info.has_metadata_areas() => {
                    debug!(vg = %vg.name, "PV {} without metadata areas belongs here", pv);
                }
                _ => return false,
            }
        }
        members.iter().all(|pv| listed.contains(*pv))
    }

    fn check_usable(&self, vg: &VolumeGroup) -> Result<(), EngineError> {
        let missing = vg.missing_pv_count();
        if missing > 0 && !self.flags.handles_missing_pvs {
            return Err(EngineError::MissingPvs {
                vg: vg.name.clone(),
                count: missing,
            });
        }
        if vg.status.move_in_progress && !self.flags.move_in_progress {
            return Err(EngineError::MoveInProgress(vg.name.clone()));
        }
        Ok(())
    }
}
