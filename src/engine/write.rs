//! engine::write
//!
//! The three-phase update: write, then commit or revert.
//!
//! # Rollback
//!
//! Areas are written in order. If one fails, the areas already written are
//! reverted and the document's sequence number is put back, so the caller
//! sees the group exactly as before the call. Precommit follows the same
//! discipline across every area.

use tracing::{debug, error, info, warn};

use crate::core::types::{LockResource, PvId};
use crate::device::Label;

use super::context::{Context, VgHandle};
use super::{EngineError, InternalEngineError};

impl Context {
    /// Write a pending copy of the document to every metadata area.
    ///
    /// Increments the sequence number. Must be followed by
    /// [`Context::vg_commit`] or [`Context::vg_revert`].
    pub fn vg_write(&mut self, handle: &mut VgHandle) -> Result<(), EngineError> {
        let name = handle.vg.name.clone();

        handle.vg.validate()?;
        if handle.vg.status.partial {
            return Err(EngineError::PartialVg(name));
        }
        let missing = handle.vg.missing_pv_count();
        if missing > 0 && !self.flags.handles_missing_pvs {
            error!("cannot update volume group {} while physical volumes are missing", name);
            return Err(EngineError::MissingPvs {
                vg: name,
                count: missing,
            });
        }
        if handle.vg.has_unknown_segments() && !self.flags.handles_unknown_segments {
            return Err(EngineError::UnknownSegments(name));
        }
        if !handle.instance.has_areas() {
            error!("aborting vg_write: no metadata areas to write to for {}", name);
            return Err(EngineError::NoMetadataAreas(name));
        }

        if let Err(e) = self.cache.drop_group_metadata(&handle.vg.id, false) {
            if !e.is_internal() {
                return Err(e.into());
            }
        }

        if self.flags.test_mode {
            info!(vg = %name, "test mode: metadata not written");
            return Ok(());
        }

        let previous = handle.vg.seqno;
        handle.vg.seqno += 1;
        let precommit = self.formats.get(&handle.instance.format)?.supports_precommit();

        let areas = &mut handle.instance.areas;
        for index in 0..areas.len() {
            let failure = if self.interrupt.is_raised() {
                Some(EngineError::Interrupted)
            } else {
                areas[index]
                    .write(&handle.vg)
                    .err()
                    .map(|source| EngineError::WriteFailed {
                        vg: name.clone(),
                        source,
                    })
            };
            if let Some(failure) = failure {
                warn!(vg = %name, "write failed on area {}; reverting {} area(s)", index + 1, index);
                for area in areas[..index].iter_mut() {
                    if let Err(e) = area.revert(&handle.vg) {
                        warn!("failed to revert {}: {}", area.describe(), e);
                    }
                }
                handle.vg.seqno = previous;
                return Err(failure);
            }
        }

        if precommit {
            for index in 0..areas.len() {
                if let Err(source) = areas[index].precommit(&handle.vg) {
                    warn!(vg = %name, "precommit failed on area {}; reverting", index + 1);
                    for area in areas.iter_mut() {
                        if let Err(e) = area.revert(&handle.vg) {
                            warn!("failed to revert {}: {}", area.describe(), e);
                        }
                    }
                    handle.vg.seqno = previous;
                    return Err(EngineError::PrecommitFailed { vg: name, source });
                }
            }
            self.cache.store_metadata(&handle.vg, true)?;
        }

        debug!(vg = %name, seqno = handle.vg.seqno, areas = areas.len(), "metadata written");
        Ok(())
    }

    /// Make the pending copy live.
    ///
    /// The cache takes the new document as soon as one area commits. If
    /// none does, the cached copy is dropped.
    ///
    /// # Errors
    ///
    /// Committing without holding the group's write lock is an internal
    /// error and touches nothing.
    pub fn vg_commit(&mut self, handle: &mut VgHandle) -> Result<(), EngineError> {
        let name = handle.vg.name.clone();
        if !self.holds_write_lock(&LockResource::for_vg(&name)) {
            let err = InternalEngineError::CommitWithoutLock { vg: name };
            error!("internal error: {}", err);
            return Err(err.into());
        }
        if self.flags.test_mode {
            self.cache.drop_group_metadata(&handle.vg.id, true)?;
            return Ok(());
        }

        let mut committed = false;
        for area in handle.instance.areas.iter_mut() {
            match area.commit(&handle.vg) {
                Ok(()) => {
                    if !committed {
                        committed = true;
                        if let Err(e) = self.cache.store_metadata(&handle.vg, false) {
                            warn!(vg = %name, "failed to cache committed metadata: {}", e);
                        }
                    }
                }
                Err(e) => warn!("failed to commit {}: {}", area.describe(), e),
            }
        }

        if !committed {
            self.cache.drop_group_metadata(&handle.vg.id, true)?;
            return Err(EngineError::CommitFailed { vg: name });
        }
        debug!(vg = %name, seqno = handle.vg.seqno, "metadata committed");
        Ok(())
    }

    /// Discard the pending copy everywhere and drop the cached copy.
    pub fn vg_revert(&mut self, handle: &mut VgHandle) -> Result<(), EngineError> {
        for area in handle.instance.areas.iter_mut() {
            if let Err(e) = area.revert(&handle.vg) {
                warn!("failed to revert {}: {}", area.describe(), e);
            }
        }
        self.cache.drop_group_metadata(&handle.vg.id, true)?;
        debug!(vg = %handle.vg.name, "metadata reverted");
        Ok(())
    }

    /// Relabel a PV as belonging to no group.
    pub fn orphan_pv(&mut self, pv_id: &PvId) -> Result<(), EngineError> {
        let info = self
            .cache
            .lookup_device(pv_id, false)
            .ok_or_else(|| crate::cache::CacheError::UnknownDevice(pv_id.clone()))?;
        let device = info.device.clone();
        let label = Label {
            pv_id: pv_id.clone(),
            format: info.format.clone(),
            sector: info.label_sector,
            size: info.size,
            mda_count: info.mda_count,
            vg: None,
        };

        if self.flags.test_mode {
            info!(pv = %pv_id, "test mode: label not written");
            return Ok(());
        }
        self.registry.write_label(&device, &label)?;
        self.cache.update_group_name_and_id(pv_id, None)?;
        debug!(pv = %pv_id, device = %device, "PV is now an orphan");
        Ok(())
    }
}
