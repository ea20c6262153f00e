//! device
//!
//! Device and label registry interface.
//!
//! The registry knows which block devices exist and can read or write the
//! fixed-location label that marks a device as a physical volume. Device
//! enumeration, filtering and the label byte layout all live behind
//! [`LabelRegistry`].
//!
//! # Labels
//!
//! A label carries the PV identity and, when the PV's metadata area has
//! been read, a [`VgSummary`] naming the group it belongs to. A label with
//! no summary places the device in its format's orphan pseudo-group.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::metadata::VgStatus;
use crate::core::types::{FormatName, PvId, VgId, VgName};

/// Sectors searched for a label, starting at sector 0.
pub const LABEL_SCAN_SECTORS: u64 = 4;

/// Errors from the device registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device not found: {0}")]
    NotFound(PathBuf),

    #[error("i/o error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("invalid label on {path}: {message}")]
    InvalidLabel { path: PathBuf, message: String },
}

/// A block device as enumerated by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Device node path.
    pub path: PathBuf,
    /// Device number.
    pub devno: u64,
    /// Whether this device is a composed/virtual layer (multipath, md,
    /// device-mapper) rather than a plain disk or partition.
    #[serde(default)]
    pub layered: bool,
}

impl Device {
    /// A plain device.
    pub fn new(path: impl Into<PathBuf>, devno: u64) -> Self {
        Self {
            path: path.into(),
            devno,
            layered: false,
        }
    }

    /// A device on a composed storage layer.
    pub fn layered(path: impl Into<PathBuf>, devno: u64) -> Self {
        Self {
            layered: true,
            ..Self::new(path, devno)
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Group membership as recorded in a PV's metadata area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VgSummary {
    pub name: VgName,
    pub id: VgId,
    #[serde(default)]
    pub status: VgStatus,
    #[serde(default)]
    pub creation_host: Option<String>,
}

/// A physical volume label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub pv_id: PvId,
    pub format: FormatName,
    /// Sector the label was found at.
    pub sector: u64,
    /// Device size in sectors.
    pub size: u64,
    /// Number of metadata areas on this PV.
    pub mda_count: u32,
    /// Owning group, if the PV's metadata names one.
    #[serde(default)]
    pub vg: Option<VgSummary>,
}

/// Device enumeration and label access.
///
/// Implementations use interior mutability where they keep state, so the
/// registry can be shared while the cache is being updated.
pub trait LabelRegistry: fmt::Debug {
    /// Enumerate devices that pass the device filter.
    ///
    /// With `refresh`, filters and device lists are rebuilt first.
    fn devices(&self, refresh: bool) -> Result<Vec<Device>, RegistryError>;

    /// Read the label at `sector`, if there is one.
    fn read_label(&self, device: &Device, sector: u64) -> Result<Option<Label>, RegistryError>;

    /// Write a label.
    fn write_label(&self, device: &Device, label: &Label) -> Result<(), RegistryError>;

    /// Wipe a device's label.
    fn remove_label(&self, device: &Device) -> Result<(), RegistryError>;

    /// Search the label sectors for a label.
    fn find_label(&self, device: &Device) -> Result<Option<Label>, RegistryError> {
        for sector in 0..LABEL_SCAN_SECTORS {
            if let Some(label) = self.read_label(device, sector)? {
                return Ok(Some(label));
            }
        }
        Ok(None)
    }
}
