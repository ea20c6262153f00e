//! scan command - rebuild the cache from every device

use anyhow::{Context as _, Result};

use crate::cache::ScanLevel;
use crate::cli::Session;

/// Rescan every device and print a summary.
pub fn scan(mut session: Session) -> Result<()> {
    let summary = session
        .ctx
        .scan(ScanLevel::Refresh)
        .context("scan failed")?;

    println!(
        "Scanned {} device(s): {} label(s), {} forgotten, {} group(s) cached",
        summary.devices_read, summary.labels_found, summary.removed, summary.warmed
    );
    for name in session.ctx.cache.vg_names() {
        if name.is_orphan() {
            continue;
        }
        if let Some(group) = session.ctx.cache.lookup_group_by_name(&name, None) {
            println!(
                "  Found volume group \"{}\" using format {} ({} device(s))",
                group.name,
                group.format,
                group.devices().count()
            );
        }
    }

    session.finish(false)
}
