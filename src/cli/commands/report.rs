//! vgs and show commands - read-only reports
//!
//! Reports tolerate what writers refuse: inconsistent copies, missing PVs
//! and interrupted moves are shown, not rejected.

use anyhow::{Context as _, Result};
use tracing::warn;

use crate::cache::ScanLevel;
use crate::cli::Session;
use crate::core::metadata::VolumeGroup;
use crate::core::types::{LockResource, VgName};
use crate::engine::{ReadOptions, VgHandle};
use crate::locking::LockMode;

fn allow_damaged(session: &mut Session) {
    session.ctx.flags.handles_missing_pvs = true;
    session.ctx.flags.move_in_progress = true;
}

fn read_for_report(
    session: &mut Session,
    name: &VgName,
    precommitted: bool,
) -> Result<VgHandle> {
    let options = ReadOptions {
        precommitted,
        ..ReadOptions::tolerant()
    };
    let handle = session
        .ctx
        .lock_and_read(name, LockMode::Read, options)
        .with_context(|| format!("cannot read volume group {}", name))?;
    if !handle.consistent {
        warn!("volume group {} metadata is inconsistent", name);
    }
    Ok(handle)
}

/// Status letters in the order resizeable, exported, partial, clustered,
/// move in progress.
pub fn attr(vg: &VolumeGroup) -> String {
    let flag = |set: bool, c: char| if set { c } else { '-' };
    [
        flag(vg.status.resizeable, 'z'),
        flag(vg.status.exported, 'x'),
        flag(vg.status.partial, 'p'),
        flag(vg.status.clustered, 'c'),
        flag(vg.status.move_in_progress, 'm'),
    ]
    .iter()
    .collect()
}

/// List every volume group.
pub fn vgs(mut session: Session) -> Result<()> {
    allow_damaged(&mut session);
    session.ctx.scan(ScanLevel::Full).context("scan failed")?;

    let names: Vec<VgName> = session
        .ctx
        .cache
        .vg_names()
        .into_iter()
        .filter(|name| !name.is_orphan())
        .collect();

    println!(
        "{:<16} {:>4} {:>4} {:>6} {:<6} {}",
        "VG", "#PV", "#LV", "SEQ", "ATTR", "ID"
    );
    let mut failures = 0;
    for name in &names {
        let resource = LockResource::for_vg(name);
        match read_for_report(&mut session, name, false) {
            Ok(handle) => {
                let vg = &handle.vg;
                println!(
                    "{:<16} {:>4} {:>4} {:>6} {:<6} {}",
                    vg.name,
                    vg.pvs.len(),
                    vg.lvs.len(),
                    vg.seqno,
                    attr(vg),
                    vg.id
                );
                session.ctx.unlock(&resource)?;
            }
            Err(e) => {
                eprintln!("error: {:#}", e);
                failures += 1;
            }
        }
    }

    session.finish(false)?;
    if failures > 0 {
        anyhow::bail!("{} volume group(s) could not be read", failures);
    }
    Ok(())
}

/// Print one group's metadata document as JSON.
pub fn show(mut session: Session, name: &VgName, precommitted: bool) -> Result<()> {
    allow_damaged(&mut session);
    let handle = read_for_report(&mut session, name, precommitted)?;
    let json = serde_json::to_string_pretty(&handle.vg).context("failed to render metadata")?;
    println!("{}", json);
    session.finish(false)
}
