//! cache::info
//!
//! Records kept by the metadata cache.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::core::metadata::VgStatus;
use crate::core::types::{FormatName, PvId, VgId, VgName};
use crate::device::{Device, Label};

/// One labeled physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub pv_id: PvId,
    pub device: Device,
    pub format: FormatName,
    /// Sector the label was found at.
    pub label_sector: u64,
    /// Device size in sectors.
    pub size: u64,
    /// Number of metadata areas on the device.
    pub mda_count: u32,
    pub(crate) group: VgId,
    pub(crate) locked: bool,
    pub(crate) invalid: bool,
}

impl DeviceInfo {
    pub(crate) fn from_label(device: Device, label: &Label, group: VgId) -> Self {
        Self {
            pv_id: label.pv_id.clone(),
            device,
            format: label.format.clone(),
            label_sector: label.sector,
            size: label.size,
            mda_count: label.mda_count,
            group,
            locked: false,
            invalid: false,
        }
    }

    /// Key of the group (or orphan pseudo-group) holding this device.
    pub fn group(&self) -> &VgId {
        &self.group
    }

    /// Whether the device was seen while its group's lock was held.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Whether the label must be re-read before it can be trusted.
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    /// Whether the device carries any metadata area.
    pub fn has_metadata_areas(&self) -> bool {
        self.mda_count > 0
    }
}

/// A serialized group document held by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMetadata {
    pub(crate) blob: String,
    pub(crate) checksum: String,
    pub(crate) precommitted: bool,
}

impl CachedMetadata {
    pub(crate) fn new(blob: String, precommitted: bool) -> Self {
        let checksum = checksum(&blob);
        Self {
            blob,
            checksum,
            precommitted,
        }
    }

    /// Whether the blob still matches the checksum taken when stored.
    pub(crate) fn is_intact(&self) -> bool {
        checksum(&self.blob) == self.checksum
    }

    /// Whether this is precommitted rather than committed metadata.
    pub fn is_precommitted(&self) -> bool {
        self.precommitted
    }

    /// Size of the serialized document in bytes.
    pub fn len(&self) -> usize {
        self.blob.len()
    }

    /// Whether the serialized document is empty.
    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }
}

fn checksum(blob: &str) -> String {
    hex::encode(Sha256::digest(blob.as_bytes()))
}

/// One known volume group, or a per-format orphan pseudo-group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgInfo {
    pub name: VgName,
    pub id: VgId,
    pub status: VgStatus,
    pub creation_host: Option<String>,
    pub format: FormatName,
    pub(crate) devices: BTreeSet<PvId>,
    pub(crate) cached: Option<CachedMetadata>,
}

impl VgInfo {
    pub(crate) fn new(name: VgName, id: VgId, format: FormatName) -> Self {
        Self {
            name,
            id,
            status: VgStatus::default(),
            creation_host: None,
            format,
            devices: BTreeSet::new(),
            cached: None,
        }
    }

    /// The orphan pseudo-group of a format.
    pub(crate) fn orphan(format: &FormatName) -> Self {
        Self::new(VgName::orphan(format), VgId::orphan(format), format.clone())
    }

    /// Whether this is an orphan pseudo-group.
    pub fn is_orphan(&self) -> bool {
        self.name.is_orphan()
    }

    /// Member devices.
    pub fn devices(&self) -> impl Iterator<Item = &PvId> {
        self.devices.iter()
    }

    /// Number of member devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Cached serialized metadata, if any.
    pub fn cached(&self) -> Option<&CachedMetadata> {
        self.cached.as_ref()
    }

    /// Whether the cached metadata is precommitted.
    pub fn is_precommitted(&self) -> bool {
        self.cached.as_ref().is_some_and(|c| c.precommitted)
    }
}
