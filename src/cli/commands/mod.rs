//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! Each handler takes the [`Session`], does its work through the engine or
//! the archive service, prints its report on stdout, and finishes the
//! session. Locks never outlive a handler.

mod backup;
mod report;
mod restore;
mod scan;

pub use backup::{archives, backup};
pub use report::{show, vgs};
pub use restore::restore;
pub use scan::scan;

use anyhow::{Context as _, Result};

use super::{Command, Session};
use crate::core::types::VgName;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, session: Session) -> Result<()> {
    match command {
        Command::Scan => scan(session),
        Command::Vgs => vgs(session),
        Command::Show { vg, precommitted } => show(session, &parse_vg(&vg)?, precommitted),
        Command::Backup { vg } => backup(session, &parse_vg(&vg)?),
        Command::Archives { vg } => archives(session, &parse_vg(&vg)?),
        Command::Restore { vg, file } => restore(session, &parse_vg(&vg)?, file.as_deref()),
    }
}

fn parse_vg(name: &str) -> Result<VgName> {
    VgName::new(name).with_context(|| format!("invalid volume group name '{}'", name))
}
