//! backup and archives commands

use anyhow::{Context as _, Result};

use crate::archive;
use crate::cli::Session;
use crate::core::types::{LockResource, VgName};
use crate::engine::ReadOptions;
use crate::locking::LockMode;

/// Bring a group's backup up to date.
pub fn backup(mut session: Session, name: &VgName) -> Result<()> {
    let handle = session
        .ctx
        .lock_and_read(name, LockMode::Read, ReadOptions::default())
        .with_context(|| format!("cannot read volume group {}", name))?;

    archive::check_current_backup(&session.ctx, &handle.vg)
        .with_context(|| format!("failed to back up {}", name))?;
    session.ctx.unlock(&LockResource::for_vg(name))?;

    if session.ctx.backup.enabled && !session.ctx.flags.test_mode {
        println!("Volume group \"{}\" successfully backed up.", name);
    }
    session.finish(false)
}

/// List a group's archives, oldest first.
pub fn archives(session: Session, name: &VgName) -> Result<()> {
    let entries = archive::list_archives(&session.ctx, name)
        .with_context(|| format!("failed to list archives of {}", name))?;

    if entries.is_empty() {
        println!("No archives of volume group \"{}\".", name);
    }
    for entry in &entries {
        println!("File:        {}", entry.path.display());
        println!("VG id:       {}", entry.vg_id);
        println!("Seqno:       {}", entry.seqno);
        println!("Created:     {}", entry.creation_time);
        println!("Description: {}", entry.description);
        println!();
    }
    session.finish(false)
}
