//! core::metadata::schema
//!
//! Volume group metadata document (v1).
//!
//! # Schema Design
//!
//! The document is the in-memory and cached form of one volume group:
//! - Self-describing with `kind` and `schema_version`
//! - Status flags are named booleans, never a bitset
//! - Strictly parsed (unknown fields rejected) and structurally validated
//!
//! The on-disk dialects are owned by format handlers; this schema is what
//! the cache serializes into its metadata blob and what archives embed.
//!
//! # Example
//!
//! ```
//! use vgcache::core::metadata::schema::{parse_metadata, PhysicalVolume, VolumeGroup};
//! use vgcache::core::types::{FormatName, PvId, VgId, VgName};
//!
//! let mut vg = VolumeGroup::new(
//!     VgName::new("vg0").unwrap(),
//!     VgId::generate(),
//!     FormatName::new("lvm2").unwrap(),
//!     8192,
//! );
//! vg.pvs.push(PhysicalVolume::new(PvId::generate(), "/dev/sda", 2048, 100));
//!
//! let json = vg.to_canonical_json().unwrap();
//! let parsed = parse_metadata(&json).unwrap();
//! assert_eq!(parsed, vg);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{FormatName, PvId, TypeError, VgId, VgName};

/// The kind identifier for volume group metadata.
pub const METADATA_KIND: &str = "vgcache.vg-metadata";

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Segment types the tooling understands. Anything else is "unknown" and
/// blocks writes unless the command declares it handles unknown segments.
pub const KNOWN_SEGMENT_TYPES: &[&str] = &["striped", "mirror", "snapshot", "raid1", "error", "zero"];

/// Errors from metadata operations.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to parse metadata: {0}")]
    ParseError(String),

    #[error("invalid kind '{found}', expected '{}'", METADATA_KIND)]
    InvalidKind { found: String },

    #[error("unsupported schema version {0}, supported: {SCHEMA_VERSION}")]
    UnsupportedVersion(u32),

    #[error("volume group {vg} failed validation: {reason}")]
    Invalid { vg: String, reason: String },

    #[error("type validation failed: {0}")]
    TypeError(#[from] TypeError),
}

/// Envelope for version dispatch before full parsing.
#[derive(Debug, Deserialize)]
struct MetadataEnvelope {
    kind: String,
    schema_version: u32,
}

/// Parse metadata JSON with version dispatch and structural validation.
///
/// # Errors
///
/// Returns an error if the JSON is malformed, the `kind` or
/// `schema_version` is wrong, or [`VolumeGroup::validate`] fails.
pub fn parse_metadata(json: &str) -> Result<VolumeGroup, MetadataError> {
    let envelope: MetadataEnvelope =
        serde_json::from_str(json).map_err(|e| MetadataError::ParseError(e.to_string()))?;

    if envelope.kind != METADATA_KIND {
        return Err(MetadataError::InvalidKind {
            found: envelope.kind,
        });
    }

    match envelope.schema_version {
        1 => {
            let vg: VolumeGroup =
                serde_json::from_str(json).map_err(|e| MetadataError::ParseError(e.to_string()))?;
            vg.validate()?;
            Ok(vg)
        }
        v => Err(MetadataError::UnsupportedVersion(v)),
    }
}

/// Volume group status flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VgStatus {
    /// The group was exported and should not be used on this host.
    pub exported: bool,
    /// The group is shared through a cluster lock backend.
    pub clustered: bool,
    /// Physical volumes may be added or removed.
    pub resizeable: bool,
    /// Assembled with some physical volumes absent.
    pub partial: bool,
    /// An extent move was started and not completed.
    pub move_in_progress: bool,
}

/// One physical volume as listed in a volume group document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhysicalVolume {
    /// Persistent identifier.
    pub id: PvId,
    /// Device path last seen for this PV, if any.
    pub device: Option<PathBuf>,
    /// First extent sector offset.
    pub pe_start: u64,
    /// Number of extents.
    pub pe_count: u64,
    /// Listed in metadata but no device carries it.
    #[serde(default)]
    pub missing: bool,
}

impl PhysicalVolume {
    /// Create a present PV.
    pub fn new(id: PvId, device: impl Into<PathBuf>, pe_start: u64, pe_count: u64) -> Self {
        Self {
            id,
            device: Some(device.into()),
            pe_start,
            pe_count,
            missing: false,
        }
    }
}

/// A contiguous run of extents on one PV used by a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StripeArea {
    pub pv: PvId,
    pub start_extent: u64,
}

/// A logical-extent range of an LV mapped onto PV areas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Segment {
    pub start_extent: u64,
    pub extent_count: u64,
    pub segment_type: String,
    pub stripes: Vec<StripeArea>,
}

impl Segment {
    /// Linear segment on a single PV.
    pub fn linear(start_extent: u64, extent_count: u64, pv: PvId, pv_start: u64) -> Self {
        Self {
            start_extent,
            extent_count,
            segment_type: "striped".to_string(),
            stripes: vec![StripeArea {
                pv,
                start_extent: pv_start,
            }],
        }
    }

    /// Whether the segment type is understood.
    pub fn is_known(&self) -> bool {
        KNOWN_SEGMENT_TYPES.contains(&self.segment_type.as_str())
    }

    /// Extents consumed on each stripe's PV.
    pub fn area_len(&self) -> u64 {
        match self.stripes.len() as u64 {
            0 => 0,
            n => self.extent_count / n,
        }
    }
}

/// A logical volume, carried only as far as extent bookkeeping needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogicalVolume {
    pub name: String,
    pub segments: Vec<Segment>,
}

impl LogicalVolume {
    /// Total logical extents.
    pub fn extent_count(&self) -> u64 {
        self.segments.iter().map(|s| s.extent_count).sum()
    }
}

/// A volume group metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeGroup {
    /// Always [`METADATA_KIND`].
    pub kind: String,
    /// Always [`SCHEMA_VERSION`].
    pub schema_version: u32,
    pub name: VgName,
    pub id: VgId,
    /// Monotonically increasing version of this document.
    pub seqno: u32,
    /// Format handler owning the on-disk copies.
    pub format: FormatName,
    #[serde(default)]
    pub status: VgStatus,
    /// Extent size in sectors.
    pub extent_size: u64,
    #[serde(default)]
    pub creation_host: Option<String>,
    pub pvs: Vec<PhysicalVolume>,
    #[serde(default)]
    pub lvs: Vec<LogicalVolume>,
}

impl VolumeGroup {
    /// Create an empty group at seqno 0.
    pub fn new(name: VgName, id: VgId, format: FormatName, extent_size: u64) -> Self {
        Self {
            kind: METADATA_KIND.to_string(),
            schema_version: SCHEMA_VERSION,
            name,
            id,
            seqno: 0,
            format,
            status: VgStatus {
                resizeable: true,
                ..VgStatus::default()
            },
            extent_size,
            creation_host: None,
            pvs: vec![],
            lvs: vec![],
        }
    }

    /// Look up a PV by id.
    pub fn pv(&self, id: &PvId) -> Option<&PhysicalVolume> {
        self.pvs.iter().find(|pv| &pv.id == id)
    }

    /// All PV ids listed in the document.
    pub fn pv_ids(&self) -> BTreeSet<PvId> {
        self.pvs.iter().map(|pv| pv.id.clone()).collect()
    }

    /// PV ids of the PVs not flagged missing.
    pub fn present_pv_ids(&self) -> BTreeSet<PvId> {
        self.pvs
            .iter()
            .filter(|pv| !pv.missing)
            .map(|pv| pv.id.clone())
            .collect()
    }

    /// Number of PVs flagged missing.
    pub fn missing_pv_count(&self) -> usize {
        self.pvs.iter().filter(|pv| pv.missing).count()
    }

    /// Whether any LV uses a segment type the tooling does not understand.
    pub fn has_unknown_segments(&self) -> bool {
        self.lvs
            .iter()
            .flat_map(|lv| lv.segments.iter())
            .any(|seg| !seg.is_known())
    }

    /// Total extents across all PVs.
    pub fn extent_count(&self) -> u64 {
        self.pvs.iter().map(|pv| pv.pe_count).sum()
    }

    /// Extents allocated to LVs.
    pub fn allocated_extents(&self) -> u64 {
        self.lvs.iter().map(LogicalVolume::extent_count).sum()
    }

    /// Serialize to canonical JSON.
    pub fn to_canonical_json(&self) -> Result<String, MetadataError> {
        serde_json::to_string(self).map_err(|e| MetadataError::ParseError(e.to_string()))
    }

    fn invalid(&self, reason: impl Into<String>) -> MetadataError {
        MetadataError::Invalid {
            vg: self.name.to_string(),
            reason: reason.into(),
        }
    }

    /// Check structural invariants.
    ///
    /// - extent size is non-zero
    /// - PV ids are unique; LV names are unique and non-empty
    /// - segments are contiguous, non-empty and split evenly across stripes
    /// - every stripe area lies inside a listed PV and no two areas overlap
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.kind != METADATA_KIND {
            return Err(MetadataError::InvalidKind {
                found: self.kind.clone(),
            });
        }

        if self.name.is_orphan() || self.id.is_orphan() {
            return Err(self.invalid("orphan pseudo-groups have no metadata document"));
        }

        if self.extent_size == 0 {
            return Err(self.invalid("extent size must be non-zero"));
        }

        let mut pv_sizes: BTreeMap<&PvId, u64> = BTreeMap::new();
        for pv in &self.pvs {
            if pv_sizes.insert(&pv.id, pv.pe_count).is_some() {
                return Err(self.invalid(format!("PV {} listed twice", pv.id)));
            }
        }

        let mut lv_names = BTreeSet::new();
        let mut used: BTreeMap<&PvId, Vec<(u64, u64)>> = BTreeMap::new();
        for lv in &self.lvs {
            if lv.name.is_empty() {
                return Err(self.invalid("LV with empty name"));
            }
            if !lv_names.insert(lv.name.as_str()) {
                return Err(self.invalid(format!("LV {} listed twice", lv.name)));
            }

            let mut next_extent = 0;
            for seg in &lv.segments {
                if seg.start_extent != next_extent {
                    return Err(self.invalid(format!(
                        "LV {} segment starts at {} but previous ended at {}",
                        lv.name, seg.start_extent, next_extent
                    )));
                }
                if seg.extent_count == 0 || seg.stripes.is_empty() {
                    return Err(self.invalid(format!("LV {} has an empty segment", lv.name)));
                }
                if seg.extent_count % seg.stripes.len() as u64 != 0 {
                    return Err(self.invalid(format!(
                        "LV {} segment of {} extents does not divide across {} stripes",
                        lv.name,
                        seg.extent_count,
                        seg.stripes.len()
                    )));
                }
                next_extent += seg.extent_count;

                let len = seg.area_len();
                for area in &seg.stripes {
                    let Some(&pe_count) = pv_sizes.get(&area.pv) else {
                        return Err(self.invalid(format!(
                            "LV {} references unknown PV {}",
                            lv.name, area.pv
                        )));
                    };
                    if area.start_extent + len > pe_count {
                        return Err(self.invalid(format!(
                            "LV {} area {}..{} exceeds PV {} size {}",
                            lv.name,
                            area.start_extent,
                            area.start_extent + len,
                            area.pv,
                            pe_count
                        )));
                    }
                    used.entry(&area.pv)
                        .or_default()
                        .push((area.start_extent, area.start_extent + len));
                }
            }
        }

        for (pv, ranges) in &mut used {
            ranges.sort_unstable();
            if ranges.windows(2).any(|w| w[1].0 < w[0].1) {
                return Err(self.invalid(format!("overlapping allocations on PV {}", pv)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vg() -> VolumeGroup {
        let pv_a = PvId::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let pv_b = PvId::new("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let mut vg = VolumeGroup::new(
            VgName::new("vg0").unwrap(),
            VgId::new("vvvvvvvvvvvvvvvvvvvvvvvvvvvvvvvv").unwrap(),
            FormatName::new("lvm2").unwrap(),
            8192,
        );
        vg.seqno = 3;
        vg.pvs.push(PhysicalVolume::new(pv_a.clone(), "/dev/sda", 2048, 100));
        vg.pvs.push(PhysicalVolume::new(pv_b.clone(), "/dev/sdb", 2048, 100));
        vg.lvs.push(LogicalVolume {
            name: "root".into(),
            segments: vec![
                Segment::linear(0, 50, pv_a.clone(), 0),
                Segment::linear(50, 20, pv_b, 0),
            ],
        });
        vg
    }

    mod parsing {
        use super::*;

        #[test]
        fn roundtrip_preserves_document() {
            let vg = sample_vg();
            let parsed = parse_metadata(&vg.to_canonical_json().unwrap()).unwrap();
            assert_eq!(parsed, vg);
            assert_eq!(parsed.allocated_extents(), 70);
        }

        #[test]
        fn rejects_wrong_kind() {
            let json = sample_vg()
                .to_canonical_json()
                .unwrap()
                .replace(METADATA_KIND, "something.else");
            assert!(matches!(
                parse_metadata(&json),
                Err(MetadataError::InvalidKind { .. })
            ));
        }

        #[test]
        fn rejects_future_version() {
            let mut vg = sample_vg();
            vg.schema_version = 2;
            let json = serde_json::to_string(&vg).unwrap();
            assert!(matches!(
                parse_metadata(&json),
                Err(MetadataError::UnsupportedVersion(2))
            ));
        }

        #[test]
        fn rejects_garbage() {
            assert!(matches!(
                parse_metadata("{not json"),
                Err(MetadataError::ParseError(_))
            ));
        }

        #[test]
        fn rejects_unknown_fields() {
            let json = sample_vg()
                .to_canonical_json()
                .unwrap()
                .replacen('{', "{\"bogus\":1,", 1);
            assert!(parse_metadata(&json).is_err());
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn sample_is_valid() {
            sample_vg().validate().unwrap();
        }

        #[test]
        fn duplicate_pv() {
            let mut vg = sample_vg();
            let dup = vg.pvs[0].clone();
            vg.pvs.push(dup);
            assert!(vg.validate().is_err());
        }

        #[test]
        fn segment_gap() {
            let mut vg = sample_vg();
            vg.lvs[0].segments[1].start_extent = 60;
            assert!(vg.validate().is_err());
        }

        #[test]
        fn area_beyond_pv() {
            let mut vg = sample_vg();
            vg.lvs[0].segments[1].stripes[0].start_extent = 90;
            assert!(vg.validate().is_err());
        }

        #[test]
        fn overlapping_areas() {
            let mut vg = sample_vg();
            let pv_a = vg.pvs[0].id.clone();
            vg.lvs.push(LogicalVolume {
                name: "swap".into(),
                segments: vec![Segment::linear(0, 10, pv_a, 45)],
            });
            assert!(vg.validate().is_err());
        }

        #[test]
        fn unknown_pv_reference() {
            let mut vg = sample_vg();
            vg.lvs[0].segments[0].stripes[0].pv = PvId::generate();
            assert!(vg.validate().is_err());
        }

        #[test]
        fn zero_extent_size() {
            let mut vg = sample_vg();
            vg.extent_size = 0;
            assert!(vg.validate().is_err());
        }
    }

    #[test]
    fn unknown_segments_detected() {
        let mut vg = sample_vg();
        assert!(!vg.has_unknown_segments());
        vg.lvs[0].segments[0].segment_type = "thin-pool".into();
        assert!(vg.has_unknown_segments());
    }

    #[test]
    fn missing_pv_count() {
        let mut vg = sample_vg();
        vg.pvs[1].missing = true;
        assert_eq!(vg.missing_pv_count(), 1);
        assert_eq!(vg.present_pv_ids().len(), 1);
    }
}
