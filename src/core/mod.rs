//! core
//!
//! Core domain types, schemas and configuration for vgcache.
//!
//! # Modules
//!
//! - [`types`] - Strong types: VgName, VgId, PvId, LockResource, etc.
//! - [`naming`] - Volume group naming rules and validation
//! - [`metadata`] - Volume group metadata schema and validation
//! - [`config`] - Configuration schema and loading
//! - [`interrupt`] - Cooperative cancellation flag
//! - [`paths`] - Centralized path routing for lock, backup and archive files
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - All validation is deterministic

pub mod config;
pub mod interrupt;
pub mod metadata;
pub mod naming;
pub mod paths;
pub mod types;
