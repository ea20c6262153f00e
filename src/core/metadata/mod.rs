//! core::metadata
//!
//! Volume group metadata schema.
//!
//! # Modules
//!
//! - [`schema`] - Metadata document types (v1) and structural validation
//!
//! # Schema Design
//!
//! - Self-describing: includes `kind` and `schema_version`
//! - No boolean blindness: status flags are named fields
//! - Strict parsing: unknown fields are rejected, and every parse is
//!   followed by structural validation

pub mod schema;

pub use schema::{
    parse_metadata, LogicalVolume, MetadataError, PhysicalVolume, Segment, StripeArea, VgStatus,
    VolumeGroup, KNOWN_SEGMENT_TYPES, METADATA_KIND, SCHEMA_VERSION,
};
