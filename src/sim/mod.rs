//! sim
//!
//! A simulated device pool.
//!
//! # Design
//!
//! The pool stands in for block devices: each simulated device may carry a
//! label and any number of metadata areas, and each area holds the
//! committed, pending and precommitted copies of one group document. The
//! pool implements [`LabelRegistry`](crate::device::LabelRegistry) and
//! hands out a [`SimulatedFormat`] implementing
//! [`FormatHandler`](crate::format::FormatHandler), so the whole engine can
//! run against it.
//!
//! State is shared across clones through `Arc<Mutex<...>>` and can be saved
//! to and loaded from a JSON file, which is what the `vgc` binary operates
//! on. Failures can be injected per area and operation with [`FailOn`].
//!
//! A label's group summary is derived from the device's first metadata
//! area, the way a real label scan reads the metadata header. Devices
//! without areas carry an explicit summary instead.
//!
//! # Example
//!
//! ```
//! use vgcache::core::types::{FormatName, PvId};
//! use vgcache::device::{Device, LabelRegistry};
//! use vgcache::sim::SimulatedPool;
//!
//! let pool = SimulatedPool::new();
//! let pv = PvId::generate();
//! pool.add_pv(Device::new("/dev/sda", 1), pv.clone(), FormatName::new("lvm2").unwrap(), 2048, 1)
//!     .unwrap();
//!
//! let label = pool.find_label(&Device::new("/dev/sda", 1)).unwrap().unwrap();
//! assert_eq!(label.pv_id, pv);
//! assert!(label.vg.is_none());
//! ```

mod format;
mod registry;

pub use format::{SimulatedArea, SimulatedFormat};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::metadata::{parse_metadata, MetadataError, VolumeGroup};
use crate::core::types::{FormatName, PvId};
use crate::device::{Device, VgSummary};

/// The kind identifier for pool files.
pub const POOL_KIND: &str = "vgcache.sim-pool";

/// Current pool file version.
pub const POOL_VERSION: u32 = 1;

/// Sector simulated labels are written at.
pub const LABEL_SECTOR: u64 = 1;

/// Errors from the simulated pool.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read pool file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write pool file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pool file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("device {0} already exists")]
    DeviceExists(PathBuf),

    #[error("no device {0}")]
    NoDevice(PathBuf),

    #[error("no device carries PV {0}")]
    NoPv(PvId),

    #[error("device {path} has no metadata area {index}")]
    NoArea { path: PathBuf, index: usize },

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// An operation on a metadata area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaOp {
    Read,
    Write,
    Precommit,
    Commit,
    Revert,
}

/// An injected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOn {
    /// One operation on one metadata area fails.
    Area {
        device: PathBuf,
        index: usize,
        op: AreaOp,
    },
    /// Reading the label of a device fails.
    Label(PathBuf),
}

/// The three copies one metadata area can hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaState {
    pub committed: Option<String>,
    pub pending: Option<String>,
    pub precommitted: Option<String>,
}

impl AreaState {
    fn clear(&mut self) {
        *self = AreaState::default();
    }
}

/// The label of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimLabel {
    pub pv_id: PvId,
    pub format: FormatName,
    pub sector: u64,
    pub size: u64,
    /// Group summary for devices without metadata areas.
    #[serde(default)]
    pub vg: Option<VgSummary>,
}

/// One simulated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimDevice {
    pub device: Device,
    #[serde(default)]
    pub label: Option<SimLabel>,
    #[serde(default)]
    pub areas: Vec<AreaState>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PoolState {
    kind: String,
    schema_version: u32,
    #[serde(default)]
    devices: BTreeMap<PathBuf, SimDevice>,
    #[serde(skip)]
    faults: Vec<FailOn>,
}

impl Default for PoolState {
    fn default() -> Self {
        Self {
            kind: POOL_KIND.to_string(),
            schema_version: POOL_VERSION,
            devices: BTreeMap::new(),
            faults: Vec::new(),
        }
    }
}

impl PoolState {
    fn device_of(&self, pv_id: &PvId) -> Option<&SimDevice> {
        self.devices
            .values()
            .find(|d| d.label.as_ref().is_some_and(|l| &l.pv_id == pv_id))
    }

    fn device_of_mut(&mut self, pv_id: &PvId) -> Option<&mut SimDevice> {
        self.devices
            .values_mut()
            .find(|d| d.label.as_ref().is_some_and(|l| &l.pv_id == pv_id))
    }

    fn fails(&self, fault: &FailOn) -> bool {
        self.faults.contains(fault)
    }
}

/// Shared simulated device pool.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPool {
    state: Arc<Mutex<PoolState>>,
}

impl SimulatedPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a pool file.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let content = fs::read_to_string(path).map_err(|source| SimError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let state: PoolState = serde_json::from_str(&content).map_err(|e| SimError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if state.kind != POOL_KIND || state.schema_version != POOL_VERSION {
            return Err(SimError::Parse {
                path: path.to_path_buf(),
                message: format!(
                    "expected {} v{}, found {} v{}",
                    POOL_KIND, POOL_VERSION, state.kind, state.schema_version
                ),
            });
        }
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Load a pool file, or start empty if it does not exist.
    pub fn load_or_new(path: &Path) -> Result<Self, SimError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save the pool atomically.
    pub fn save(&self, path: &Path) -> Result<(), SimError> {
        let write_err = |source| SimError::Write {
            path: path.to_path_buf(),
            source,
        };
        let content = serde_json::to_string_pretty(&*self.state()).map_err(|e| SimError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let temp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&temp).map_err(write_err)?;
            file.write_all(content.as_bytes()).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&temp, path).map_err(write_err)?;
        Ok(())
    }

    /// Add a device carrying a fresh PV label and `mda_count` empty
    /// metadata areas.
    pub fn add_pv(
        &self,
        device: Device,
        pv_id: PvId,
        format: FormatName,
        size: u64,
        mda_count: usize,
    ) -> Result<(), SimError> {
        let mut state = self.state();
        if state.devices.contains_key(&device.path) {
            return Err(SimError::DeviceExists(device.path));
        }
        let path = device.path.clone();
        state.devices.insert(
            path,
            SimDevice {
                device,
                label: Some(SimLabel {
                    pv_id,
                    format,
                    sector: LABEL_SECTOR,
                    size,
                    vg: None,
                }),
                areas: vec![AreaState::default(); mda_count],
            },
        );
        Ok(())
    }

    /// Add a device with no label.
    pub fn add_blank(&self, device: Device) -> Result<(), SimError> {
        let mut state = self.state();
        if state.devices.contains_key(&device.path) {
            return Err(SimError::DeviceExists(device.path));
        }
        let path = device.path.clone();
        state.devices.insert(
            path,
            SimDevice {
                device,
                label: None,
                areas: Vec::new(),
            },
        );
        Ok(())
    }

    /// Commit a group document straight to every area of every present PV
    /// it lists, as group creation would.
    pub fn create_vg(&self, vg: &VolumeGroup) -> Result<(), SimError> {
        let json = vg.to_canonical_json()?;
        let summary = VgSummary {
            name: vg.name.clone(),
            id: vg.id.clone(),
            status: vg.status.clone(),
            creation_host: vg.creation_host.clone(),
        };

        let mut state = self.state();
        for pv in vg.pvs.iter().filter(|pv| !pv.missing) {
            let device = state
                .device_of_mut(&pv.id)
                .ok_or_else(|| SimError::NoPv(pv.id.clone()))?;
            if device.areas.is_empty() {
                if let Some(label) = device.label.as_mut() {
                    label.vg = Some(summary.clone());
                }
            }
            for area in &mut device.areas {
                area.clear();
                area.committed = Some(json.clone());
            }
        }
        Ok(())
    }

    /// Overwrite the committed copy held by one area.
    pub fn set_committed(
        &self,
        path: &Path,
        index: usize,
        vg: Option<&VolumeGroup>,
    ) -> Result<(), SimError> {
        let json = vg.map(VolumeGroup::to_canonical_json).transpose()?;
        let mut state = self.state();
        let area = state
            .devices
            .get_mut(path)
            .and_then(|d| d.areas.get_mut(index))
            .ok_or_else(|| SimError::NoArea {
                path: path.to_path_buf(),
                index,
            })?;
        area.clear();
        area.committed = json;
        Ok(())
    }

    /// Overwrite the raw committed text of one area.
    pub fn set_committed_raw(&self, path: &Path, index: usize, raw: &str) -> Result<(), SimError> {
        let mut state = self.state();
        let area = state
            .devices
            .get_mut(path)
            .and_then(|d| d.areas.get_mut(index))
            .ok_or_else(|| SimError::NoArea {
                path: path.to_path_buf(),
                index,
            })?;
        area.committed = Some(raw.to_string());
        Ok(())
    }

    /// Set the group summary on a device without metadata areas.
    pub fn set_label_vg(&self, path: &Path, vg: Option<VgSummary>) -> Result<(), SimError> {
        let mut state = self.state();
        let label = state
            .devices
            .get_mut(path)
            .and_then(|d| d.label.as_mut())
            .ok_or_else(|| SimError::NoDevice(path.to_path_buf()))?;
        label.vg = vg;
        Ok(())
    }

    /// A copy of one area's state.
    pub fn area(&self, path: &Path, index: usize) -> Option<AreaState> {
        self.state()
            .devices
            .get(path)
            .and_then(|d| d.areas.get(index))
            .cloned()
    }

    /// The committed document held by one area, if it parses.
    pub fn committed(&self, path: &Path, index: usize) -> Option<VolumeGroup> {
        self.area(path, index)
            .and_then(|a| a.committed)
            .and_then(|json| parse_metadata(&json).ok())
    }

    /// The precommitted document held by one area, if any.
    pub fn precommitted(&self, path: &Path, index: usize) -> Option<VolumeGroup> {
        self.area(path, index)
            .and_then(|a| a.precommitted)
            .and_then(|json| parse_metadata(&json).ok())
    }

    /// A copy of one device.
    pub fn device(&self, path: &Path) -> Option<SimDevice> {
        self.state().devices.get(path).cloned()
    }

    /// The device carrying a PV.
    pub fn device_of(&self, pv_id: &PvId) -> Option<SimDevice> {
        self.state().device_of(pv_id).cloned()
    }

    /// Paths of every device, in order.
    pub fn device_paths(&self) -> Vec<PathBuf> {
        self.state().devices.keys().cloned().collect()
    }

    /// Formats named by any label in the pool.
    pub fn format_names(&self) -> BTreeSet<FormatName> {
        self.state()
            .devices
            .values()
            .filter_map(|d| d.label.as_ref().map(|l| l.format.clone()))
            .collect()
    }

    /// Detach a device from the pool.
    pub fn unplug(&self, path: &Path) -> Option<SimDevice> {
        self.state().devices.remove(path)
    }

    /// Reattach a device.
    pub fn plug(&self, device: SimDevice) {
        let path = device.device.path.clone();
        self.state().devices.insert(path, device);
    }

    /// Inject a failure. It stays until cleared.
    pub fn fail_on(&self, fault: FailOn) {
        self.state().faults.push(fault);
    }

    /// Remove every injected failure.
    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// A format handler over this pool.
    pub fn format(&self, name: FormatName, supports_precommit: bool) -> SimulatedFormat {
        SimulatedFormat::new(self.clone(), name, supports_precommit)
    }
}
