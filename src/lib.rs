//! vgcache - volume group metadata cache and consistency control
//!
//! vgcache keeps an in-memory index of which devices carry which volume
//! groups, arbitrates access to groups through named locks, and reads and
//! writes group metadata across every redundant metadata area so that a
//! group is never handed out half-updated.
//!
//! # Architecture
//!
//! The codebase is layered:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Per-process [`engine::Context`]: read protocol, write,
//!   commit and revert, PV orphaning
//! - [`archive`] - Metadata archives, backups and restore
//! - [`cache`] - Device and group index, label scanning, cached metadata
//! - [`locking`] - Lock table, lock backends and the lock manager
//! - [`format`] - Format handler and metadata area seams
//! - [`device`] - Device enumeration and label seam
//! - [`sim`] - A simulated device pool implementing both seams
//! - [`core`] - Domain types, configuration, paths and the metadata schema
//! - [`logging`] - Tracing initialization
//!
//! # Correctness Invariants
//!
//! 1. A read returns one self-consistent document or fails
//! 2. Cached metadata is only trusted while its group is locked
//! 3. Each group name has at most one primary record
//! 4. Sequence numbers never go backwards on a successful write

pub mod archive;
pub mod cache;
pub mod cli;
pub mod core;
pub mod device;
pub mod engine;
pub mod format;
pub mod locking;
pub mod logging;
pub mod sim;
