//! restore command - write saved metadata back to the devices
//!
//! The group's write lock is taken before the orphan lock, which is the
//! order the lock manager enforces.

use std::path::Path;

use anyhow::{Context as _, Result};

use crate::archive;
use crate::cache::ScanLevel;
use crate::cli::Session;
use crate::core::types::{LockResource, VgName};
use crate::locking::LockMode;

/// Restore a group from its backup, or from `file` when given.
pub fn restore(mut session: Session, name: &VgName, file: Option<&Path>) -> Result<()> {
    let ctx = &mut session.ctx;
    ctx.lock(&LockResource::for_vg(name), LockMode::Write)
        .with_context(|| format!("cannot lock volume group {}", name))?;
    ctx.lock(&LockResource::Orphans, LockMode::Write)
        .context("cannot lock orphan physical volumes")?;
    ctx.scan(ScanLevel::Refresh).context("scan failed")?;

    let restored = match file {
        Some(path) => archive::restore_from_file(ctx, name, path)
            .with_context(|| format!("failed to restore {} from {}", name, path.display()))?,
        None => archive::restore_from_backup(ctx, name)
            .with_context(|| format!("failed to restore {} from its backup", name))?,
    };

    if ctx.flags.test_mode {
        println!("Test mode: volume group \"{}\" not restored.", name);
    } else {
        println!(
            "Restored volume group \"{}\" (seqno {}).",
            restored.name, restored.seqno
        );
    }
    session.finish(true)
}
