//! sim::format
//!
//! Format handler and metadata areas on the simulated pool.

use std::path::PathBuf;

use crate::core::metadata::{parse_metadata, VolumeGroup};
use crate::core::types::{FormatName, PvId, VgId, VgName};
use crate::format::{FormatError, FormatHandler, FormatInstance, MetadataArea};

use super::{AreaOp, AreaState, FailOn, SimulatedPool};

/// Format handler whose areas live in a [`SimulatedPool`].
#[derive(Debug, Clone)]
pub struct SimulatedFormat {
    pool: SimulatedPool,
    name: FormatName,
    precommit: bool,
}

impl SimulatedFormat {
    /// Create a handler named `name`.
    pub fn new(pool: SimulatedPool, name: FormatName, precommit: bool) -> Self {
        Self {
            pool,
            name,
            precommit,
        }
    }
}

impl FormatHandler for SimulatedFormat {
    fn name(&self) -> &FormatName {
        &self.name
    }

    fn supports_precommit(&self) -> bool {
        self.precommit
    }

    fn create_instance(
        &self,
        vg_name: &VgName,
        _vg_id: Option<&VgId>,
        members: &[PvId],
    ) -> Result<FormatInstance, FormatError> {
        let state = self.pool.state();
        let mut areas: Vec<Box<dyn MetadataArea>> = Vec::new();
        for pv in members {
            let Some(device) = state.device_of(pv) else {
                continue;
            };
            if device.label.as_ref().is_some_and(|l| l.format != self.name) {
                continue;
            }
            for index in 0..device.areas.len() {
                areas.push(Box::new(SimulatedArea {
                    pool: self.pool.clone(),
                    path: device.device.path.clone(),
                    index,
                }));
            }
        }
        Ok(FormatInstance::new(self.name.clone(), vg_name.clone(), areas))
    }
}

/// One metadata area on a simulated device.
#[derive(Debug, Clone)]
pub struct SimulatedArea {
    pool: SimulatedPool,
    path: PathBuf,
    index: usize,
}

impl SimulatedArea {
    fn with_state<T>(
        &self,
        op: AreaOp,
        f: impl FnOnce(&mut AreaState) -> Result<T, FormatError>,
    ) -> Result<T, FormatError> {
        let mut state = self.pool.state();
        let fault = FailOn::Area {
            device: self.path.clone(),
            index: self.index,
            op,
        };
        if state.fails(&fault) {
            return Err(FormatError::Io {
                area: self.describe(),
                message: format!("injected {:?} failure", op).to_lowercase(),
            });
        }
        let area = state
            .devices
            .get_mut(&self.path)
            .and_then(|d| d.areas.get_mut(self.index))
            .ok_or_else(|| FormatError::Io {
                area: self.describe(),
                message: "device not present".to_string(),
            })?;
        f(area)
    }

    fn parse_for(json: Option<&str>, vg_name: &VgName) -> Result<Option<VolumeGroup>, FormatError> {
        let Some(json) = json else {
            return Ok(None);
        };
        let vg = parse_metadata(json)?;
        Ok((&vg.name == vg_name).then_some(vg))
    }
}

impl MetadataArea for SimulatedArea {
    fn describe(&self) -> String {
        format!("{}:mda{}", self.path.display(), self.index)
    }

    fn read(&self, vg_name: &VgName) -> Result<Option<VolumeGroup>, FormatError> {
        self.with_state(AreaOp::Read, |area| {
            Self::parse_for(area.committed.as_deref(), vg_name)
        })
    }

    fn read_precommit(&self, vg_name: &VgName) -> Result<Option<VolumeGroup>, FormatError> {
        self.with_state(AreaOp::Read, |area| {
            let json = area.precommitted.as_deref().or(area.committed.as_deref());
            Self::parse_for(json, vg_name)
        })
    }

    fn write(&mut self, vg: &VolumeGroup) -> Result<(), FormatError> {
        let json = vg.to_canonical_json()?;
        self.with_state(AreaOp::Write, |area| {
            area.pending = Some(json);
            Ok(())
        })
    }

    fn precommit(&mut self, vg: &VolumeGroup) -> Result<(), FormatError> {
        let json = vg.to_canonical_json()?;
        self.with_state(AreaOp::Precommit, |area| {
            area.precommitted = Some(area.pending.clone().unwrap_or(json));
            Ok(())
        })
    }

    fn commit(&mut self, vg: &VolumeGroup) -> Result<(), FormatError> {
        let json = vg.to_canonical_json()?;
        self.with_state(AreaOp::Commit, |area| {
            let live = area
                .pending
                .take()
                .or_else(|| area.precommitted.take())
                .unwrap_or(json);
            area.committed = Some(live);
            area.precommitted = None;
            Ok(())
        })
    }

    fn revert(&mut self, _vg: &VolumeGroup) -> Result<(), FormatError> {
        self.with_state(AreaOp::Revert, |area| {
            area.pending = None;
            area.precommitted = None;
            Ok(())
        })
    }

    fn remove(&mut self, _vg: &VolumeGroup) -> Result<(), FormatError> {
        self.with_state(AreaOp::Write, |area| {
            area.clear();
            Ok(())
        })
    }
}
