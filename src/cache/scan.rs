//! cache::scan
//!
//! Label scanning.
//!
//! # Levels
//!
//! - [`ScanLevel::Quick`] (0) and [`ScanLevel::Full`] (1) read every
//!   device's label, or once a refresh scan has completed, only the labels
//!   of untrusted devices
//! - [`ScanLevel::Refresh`] (2) rebuilds the device list, reads every
//!   label, forgets devices that vanished and marks the scan completed
//!
//! After a whole pass, groups whose metadata copies all agree are read
//! into the cache so the first command after a scan starts warm.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::core::interrupt::Interrupt;
use crate::core::types::{FormatName, PvId, VgId, VgName};
use crate::device::{Device, LabelRegistry, RegistryError};
use crate::format::FormatRegistry;

use super::{CacheError, MetadataCache};

/// How thoroughly to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScanLevel {
    Quick = 0,
    Full = 1,
    Refresh = 2,
}

impl TryFrom<u8> for ScanLevel {
    type Error = u8;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(ScanLevel::Quick),
            1 => Ok(ScanLevel::Full),
            2 => Ok(ScanLevel::Refresh),
            other => Err(other),
        }
    }
}

/// What a scan did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Another scan was already running; nothing was done.
    pub skipped: bool,
    /// Devices whose label sectors were read.
    pub devices_read: usize,
    /// Devices that carried a label.
    pub labels_found: usize,
    /// Cached devices forgotten because they vanished.
    pub removed: usize,
    /// Groups whose metadata was cached afterwards.
    pub warmed: usize,
    /// The scan stopped early on interrupt.
    pub interrupted: bool,
}

impl MetadataCache {
    /// Re-read device labels.
    ///
    /// Nested calls (from format handlers reacting to a scan) return
    /// immediately with `skipped` set.
    pub fn full_scan(
        &mut self,
        registry: &dyn LabelRegistry,
        formats: &FormatRegistry,
        level: ScanLevel,
        interrupt: &Interrupt,
    ) -> Result<ScanSummary, CacheError> {
        if self.scanning {
            debug!(?level, "scan already in progress");
            return Ok(ScanSummary {
                skipped: true,
                ..ScanSummary::default()
            });
        }

        self.scanning = true;
        let result = self.scan_pass(registry, formats, level, interrupt);
        self.scanning = false;
        result
    }

    fn scan_pass(
        &mut self,
        registry: &dyn LabelRegistry,
        formats: &FormatRegistry,
        level: ScanLevel,
        interrupt: &Interrupt,
    ) -> Result<ScanSummary, CacheError> {
        let mut summary = ScanSummary::default();

        if self.scan_completed && level < ScanLevel::Refresh {
            let invalid: Vec<Device> = self
                .devices
                .values()
                .filter(|d| d.invalid)
                .map(|d| d.device.clone())
                .collect();
            debug!(count = invalid.len(), "re-reading untrusted labels");
            for device in invalid {
                if interrupt.is_raised() {
                    summary.interrupted = true;
                    break;
                }
                self.scan_one(registry, &device, &mut summary);
            }
            return Ok(summary);
        }

        let devices = registry.devices(level == ScanLevel::Refresh)?;
        debug!(?level, count = devices.len(), "scanning labels");
        for device in &devices {
            if interrupt.is_raised() {
                warn!("scan interrupted");
                summary.interrupted = true;
                break;
            }
            self.scan_one(registry, device, &mut summary);
        }
        if summary.interrupted {
            return Ok(summary);
        }

        if level == ScanLevel::Refresh {
            let seen: BTreeSet<&std::path::Path> = devices.iter().map(|d| d.path.as_path()).collect();
            let gone: Vec<PvId> = self
                .devices
                .values()
                .filter(|d| !seen.contains(d.device.path.as_path()))
                .map(|d| d.pv_id.clone())
                .collect();
            for pv in gone {
                debug!(pv = %pv, "device vanished");
                self.remove_device(&pv);
                summary.removed += 1;
            }
        }

        for handler in formats.iter() {
            if let Err(e) = handler.scan() {
                warn!(format = %handler.name(), "format scan failed: {}", e);
            }
        }

        if level == ScanLevel::Refresh {
            self.scan_completed = true;
        }
        summary.warmed = self.warm_metadata(formats);
        Ok(summary)
    }

    fn scan_one(&mut self, registry: &dyn LabelRegistry, device: &Device, summary: &mut ScanSummary) {
        summary.devices_read += 1;
        match self.label_device(registry, device) {
            Ok(Some(_)) => summary.labels_found += 1,
            Ok(None) => {}
            Err(e) => warn!(device = %device, "failed to read label: {}", e),
        }
    }

    /// Read one device's label into the cache.
    ///
    /// A cached device whose label has disappeared becomes an orphan. A
    /// failed read leaves the device untrusted.
    pub fn label_device(
        &mut self,
        registry: &dyn LabelRegistry,
        device: &Device,
    ) -> Result<Option<PvId>, RegistryError> {
        let known = self.device_at_path(&device.path).map(|d| d.pv_id.clone());
        match registry.find_label(device) {
            Ok(Some(label)) => Ok(self
                .add_device(device.clone(), &label)
                .map(|info| info.pv_id.clone())),
            Ok(None) => {
                if let Some(pv) = known {
                    debug!(device = %device, "label gone");
                    self.rehome(&pv, None);
                }
                Ok(None)
            }
            Err(e) => {
                if let Some(info) = known.and_then(|pv| self.devices.get_mut(&pv)) {
                    info.invalid = true;
                }
                Err(e)
            }
        }
    }

    /// Re-read the labels of a group's untrusted devices and report the
    /// group's format.
    ///
    /// Returns `None` if the group is unknown or no longer exists under
    /// this name after the re-read.
    pub fn revalidate_group(
        &mut self,
        registry: &dyn LabelRegistry,
        name: &VgName,
        id: Option<&VgId>,
    ) -> Option<FormatName> {
        let group = self.lookup_group_by_name(name, id)?;
        let group_id = group.id.clone();
        let stale: Vec<Device> = group
            .devices
            .iter()
            .filter_map(|pv| self.devices.get(pv))
            .filter(|d| !self.is_device_valid(d))
            .map(|d| d.device.clone())
            .collect();

        for device in stale {
            if let Err(e) = self.label_device(registry, &device) {
                warn!(device = %device, "failed to re-read label: {}", e);
            }
        }

        self.fmt_for_group(name, Some(&group_id))
    }

    /// Cache metadata for groups whose copies all agree with each other
    /// and with the cached membership.
    fn warm_metadata(&mut self, formats: &FormatRegistry) -> usize {
        let candidates: Vec<(VgName, VgId, FormatName, Vec<PvId>)> = self
            .groups
            .values()
            .filter(|g| !g.is_orphan() && g.cached.is_none())
            .map(|g| {
                (
                    g.name.clone(),
                    g.id.clone(),
                    g.format.clone(),
                    g.devices.iter().cloned().collect(),
                )
            })
            .collect();

        let mut warmed = 0;
        for (name, id, format, members) in candidates {
            let Ok(handler) = formats.get(&format) else {
                continue;
            };
            let Ok(instance) = handler.create_instance(&name, Some(&id), &members) else {
                continue;
            };
            if !instance.has_areas() {
                continue;
            }

            let mut copies = Vec::with_capacity(instance.areas.len());
            for area in &instance.areas {
                match area.read(&name) {
                    Ok(Some(vg)) => copies.push(vg),
                    _ => break,
                }
            }
            if copies.len() != instance.areas.len() {
                continue;
            }

            let first = &copies[0];
            let unanimous = copies.iter().all(|vg| vg == first);
            let members: BTreeSet<PvId> = members.into_iter().collect();
            if unanimous && first.id == id && first.present_pv_ids() == members {
                if let Err(e) = self.store_metadata(first, false) {
                    debug!(vg = %name, "not caching metadata: {}", e);
                    continue;
                }
                warmed += 1;
            }
        }
        warmed
    }
}
