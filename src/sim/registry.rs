//! sim::registry
//!
//! Label access on the simulated pool.

use tracing::debug;

use crate::core::metadata::parse_metadata;
use crate::device::{Device, Label, LabelRegistry, RegistryError, VgSummary};

use super::{FailOn, SimDevice, SimLabel, SimulatedPool};

fn summary_of(device: &SimDevice, label: &SimLabel) -> Option<VgSummary> {
    let Some(first) = device.areas.first() else {
        return label.vg.clone();
    };
    let json = first.committed.as_deref()?;
    match parse_metadata(json) {
        Ok(vg) => Some(VgSummary {
            name: vg.name,
            id: vg.id,
            status: vg.status,
            creation_host: vg.creation_host,
        }),
        Err(e) => {
            debug!(device = %device.device, "metadata header unreadable: {}", e);
            None
        }
    }
}

impl LabelRegistry for SimulatedPool {
    fn devices(&self, _refresh: bool) -> Result<Vec<Device>, RegistryError> {
        Ok(self
            .state()
            .devices
            .values()
            .map(|d| d.device.clone())
            .collect())
    }

    fn read_label(&self, device: &Device, sector: u64) -> Result<Option<Label>, RegistryError> {
        let state = self.state();
        if state.fails(&FailOn::Label(device.path.clone())) {
            return Err(RegistryError::Io {
                path: device.path.clone(),
                message: "injected read error".to_string(),
            });
        }
        let sim = state
            .devices
            .get(&device.path)
            .ok_or_else(|| RegistryError::NotFound(device.path.clone()))?;

        let Some(label) = sim.label.as_ref().filter(|l| l.sector == sector) else {
            return Ok(None);
        };
        Ok(Some(Label {
            pv_id: label.pv_id.clone(),
            format: label.format.clone(),
            sector: label.sector,
            size: label.size,
            mda_count: u32::try_from(sim.areas.len()).unwrap_or(u32::MAX),
            vg: summary_of(sim, label),
        }))
    }

    fn write_label(&self, device: &Device, label: &Label) -> Result<(), RegistryError> {
        let mut state = self.state();
        let sim = state
            .devices
            .get_mut(&device.path)
            .ok_or_else(|| RegistryError::NotFound(device.path.clone()))?;

        // An orphan label means the PV left its group; its metadata goes too
        if label.vg.is_none() {
            for area in &mut sim.areas {
                area.clear();
            }
        }
        sim.label = Some(SimLabel {
            pv_id: label.pv_id.clone(),
            format: label.format.clone(),
            sector: label.sector,
            size: label.size,
            vg: if sim.areas.is_empty() {
                label.vg.clone()
            } else {
                None
            },
        });
        Ok(())
    }

    fn remove_label(&self, device: &Device) -> Result<(), RegistryError> {
        let mut state = self.state();
        let sim = state
            .devices
            .get_mut(&device.path)
            .ok_or_else(|| RegistryError::NotFound(device.path.clone()))?;
        sim.label = None;
        for area in &mut sim.areas {
            area.clear();
        }
        Ok(())
    }
}
