//! format
//!
//! Format handler interface.
//!
//! A format handler owns one on-disk metadata dialect. For a given group it
//! produces a [`FormatInstance`]: the set of metadata areas that hold copies
//! of that group's document. Each area supports the three-phase update
//! used by the engine:
//!
//! 1. `write` stores a pending copy
//! 2. `precommit` makes the pending copy visible to precommitted reads
//! 3. `commit` makes it the live copy, or `revert` discards it

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::core::metadata::{parse_metadata, MetadataError, VolumeGroup};
use crate::core::types::{FormatName, PvId, VgId, VgName};

/// Errors from format handlers and metadata areas.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("metadata area {area}: {message}")]
    Io { area: String, message: String },

    #[error("metadata area {area} does not support {operation}")]
    Unsupported {
        area: String,
        operation: &'static str,
    },

    #[error("unknown format '{0}'")]
    UnknownFormat(FormatName),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// One location holding a copy of a group's metadata.
pub trait MetadataArea: fmt::Debug {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Read the committed copy. `Ok(None)` means the area holds no copy
    /// of this group.
    fn read(&self, vg_name: &VgName) -> Result<Option<VolumeGroup>, FormatError>;

    /// Read the precommitted copy, falling back to the committed one when
    /// nothing is pending.
    fn read_precommit(&self, vg_name: &VgName) -> Result<Option<VolumeGroup>, FormatError>;

    /// Store a pending copy.
    fn write(&mut self, vg: &VolumeGroup) -> Result<(), FormatError>;

    /// Expose the pending copy to precommitted reads.
    fn precommit(&mut self, vg: &VolumeGroup) -> Result<(), FormatError>;

    /// Make the pending copy live.
    fn commit(&mut self, vg: &VolumeGroup) -> Result<(), FormatError>;

    /// Discard any pending copy.
    fn revert(&mut self, vg: &VolumeGroup) -> Result<(), FormatError>;

    /// Erase this group's metadata from the area.
    fn remove(&mut self, vg: &VolumeGroup) -> Result<(), FormatError>;
}

/// The metadata areas of one group under one format.
#[derive(Debug)]
pub struct FormatInstance {
    pub format: FormatName,
    pub vg_name: VgName,
    pub areas: Vec<Box<dyn MetadataArea>>,
}

impl FormatInstance {
    /// Create an instance over a set of areas.
    pub fn new(format: FormatName, vg_name: VgName, areas: Vec<Box<dyn MetadataArea>>) -> Self {
        Self {
            format,
            vg_name,
            areas,
        }
    }

    /// Whether there is anywhere to write to.
    pub fn has_areas(&self) -> bool {
        !self.areas.is_empty()
    }
}

/// One on-disk metadata dialect.
pub trait FormatHandler: fmt::Debug {
    /// Format name, also used for the format's orphan pseudo-group.
    fn name(&self) -> &FormatName;

    /// Whether areas of this format implement a distinct precommit state.
    fn supports_precommit(&self) -> bool;

    /// Build the metadata areas for a group.
    ///
    /// `members` are the PVs the cache currently places in the group.
    fn create_instance(
        &self,
        vg_name: &VgName,
        vg_id: Option<&VgId>,
        members: &[PvId],
    ) -> Result<FormatInstance, FormatError>;

    /// Format-specific scanning beyond labels (independent metadata
    /// areas, text files). Most formats have nothing to do.
    fn scan(&self) -> Result<(), FormatError> {
        Ok(())
    }

    /// Decode a document produced by [`FormatHandler::serialize`].
    fn parse(&self, bytes: &str) -> Result<VolumeGroup, FormatError> {
        Ok(parse_metadata(bytes)?)
    }

    /// Encode a document.
    fn serialize(&self, vg: &VolumeGroup) -> Result<String, FormatError> {
        Ok(vg.to_canonical_json()?)
    }
}

/// The set of format handlers known to a process.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    handlers: BTreeMap<FormatName, Arc<dyn FormatHandler>>,
}

impl FormatRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler, replacing any handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn FormatHandler>) {
        self.handlers.insert(handler.name().clone(), handler);
    }

    /// Look up a handler.
    pub fn get(&self, name: &FormatName) -> Result<Arc<dyn FormatHandler>, FormatError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| FormatError::UnknownFormat(name.clone()))
    }

    /// Names of all registered formats.
    pub fn names(&self) -> Vec<FormatName> {
        self.handlers.keys().cloned().collect()
    }

    /// Iterate over the handlers.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FormatHandler>> {
        self.handlers.values()
    }
}
