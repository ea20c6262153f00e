//! archive
//!
//! Metadata archives and backups.
//!
//! # Storage
//!
//! - `<archive_dir>/<vg>_<index:05>-<rand>.vg` - one snapshot per change,
//!   taken before the change; pruned by count and age
//! - `<backup_dir>/<vg>` - the current metadata, replaced after each change
//!
//! Both hold the same JSON envelope: a description, the host and time it
//! was written, and the group document.
//!
//! # Consistency
//!
//! Backups are eventually consistent. [`check_current_backup`] compares
//! the backup with the live group and, when they differ, archives the
//! stale backup and rewrites it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::ScanLevel;
use crate::core::config::Config;
use crate::core::metadata::{MetadataError, VolumeGroup};
use crate::core::paths::SystemPaths;
use crate::core::types::{FormatName, LockResource, PvId, UtcTimestamp, VgId, VgName};
use crate::device::{Label, VgSummary};
use crate::engine::{Context, EngineError, VgHandle};

/// The kind identifier for archive and backup files.
pub const ARCHIVE_KIND: &str = "vgcache.vg-archive";

/// Current archive file version.
pub const ARCHIVE_VERSION: u32 = 1;

/// Errors from archive and backup operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid archive file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("no backup of {0}")]
    NoBackup(VgName),

    #[error("cannot restore {vg}: {count} physical volume(s) missing")]
    MissingPvs { vg: VgName, count: usize },

    #[error("cannot restore: PV {0} is not present")]
    UnknownPv(PvId),

    #[error("cannot restore: PV {pv} has format {found}, expected {expected}")]
    FormatMismatch {
        pv: PvId,
        expected: FormatName,
        found: FormatName,
    },

    #[error("restore needs the {0} write lock")]
    LockRequired(LockResource),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ArchiveError {
    /// Remediation text for errors the user can act on.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ArchiveError::Engine(e) => e.hint(),
            ArchiveError::NoBackup(_) => Some("restore from an archive instead (vgc archives, then vgc restore --file)"),
            ArchiveError::MissingPvs { .. } | ArchiveError::UnknownPv(_) => {
                Some("reconnect every physical volume the group lists, then rescan")
            }
            _ => None,
        }
    }
}

/// Archive settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveParams {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Never prune below this many archives per group.
    pub retain_min: u32,
    /// Never prune archives younger than this.
    pub retain_days: u32,
}

impl ArchiveParams {
    /// Settings from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.archive_enabled(),
            dir: config.archive_dir(),
            retain_min: config.retain_min(),
            retain_days: config.retain_days(),
        }
    }
}

/// Backup settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupParams {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl BackupParams {
    /// Settings from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.backup_enabled(),
            dir: config.backup_dir(),
        }
    }
}

/// Archive and backup file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveFile {
    pub kind: String,
    pub schema_version: u32,
    pub description: String,
    pub creation_host: String,
    pub creation_time: UtcTimestamp,
    pub vg: VolumeGroup,
}

impl ArchiveFile {
    fn new(vg: &VolumeGroup, description: &str, host: &str) -> Self {
        Self {
            kind: ARCHIVE_KIND.to_string(),
            schema_version: ARCHIVE_VERSION,
            description: description.to_string(),
            creation_host: host.to_string(),
            creation_time: UtcTimestamp::now(),
            vg: vg.clone(),
        }
    }

    /// Read and check a file.
    pub fn read(path: &Path) -> Result<Self, ArchiveError> {
        let content = fs::read_to_string(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |message: String| ArchiveError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let file: ArchiveFile =
            serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?;
        if file.kind != ARCHIVE_KIND {
            return Err(parse_err(format!("unexpected kind '{}'", file.kind)));
        }
        if file.schema_version != ARCHIVE_VERSION {
            return Err(parse_err(format!(
                "unsupported version {}",
                file.schema_version
            )));
        }
        file.vg.validate()?;
        Ok(file)
    }

    fn to_json(&self) -> Result<String, ArchiveError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MetadataError::ParseError(e.to_string()).into())
    }
}

/// One archived snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub index: u32,
    pub description: String,
    pub creation_time: UtcTimestamp,
    pub vg_id: VgId,
    pub seqno: u32,
}

fn paths(ctx: &Context) -> SystemPaths {
    SystemPaths::new(
        ctx.config.locking_dir(),
        ctx.backup.dir.clone(),
        ctx.archive.dir.clone(),
    )
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_synced(path: &Path, content: &str) -> Result<(), ArchiveError> {
    let mut file = fs::File::create(path).map_err(io_err(path))?;
    file.write_all(content.as_bytes()).map_err(io_err(path))?;
    file.sync_all().map_err(io_err(path))?;
    Ok(())
}

/// Snapshot a group into the archive directory.
///
/// Returns the archive written, or `None` when archiving is disabled, in
/// test mode, or the directory cannot be used.
pub fn archive(
    ctx: &Context,
    vg: &VolumeGroup,
    description: &str,
) -> Result<Option<PathBuf>, ArchiveError> {
    if !ctx.archive.enabled {
        debug!(vg = %vg.name, "archiving disabled");
        return Ok(None);
    }
    if ctx.flags.test_mode {
        info!(vg = %vg.name, "test mode: skipping archiving");
        return Ok(None);
    }
    let dir = &ctx.archive.dir;
    if let Err(e) = fs::create_dir_all(dir) {
        warn!("archive directory {} is not usable: {}", dir.display(), e);
        return Ok(None);
    }

    let existing = list_archives(ctx, &vg.name)?;
    let index = existing.last().map_or(0, |entry| entry.index + 1);
    let suffix = uuid::Uuid::new_v4().as_fields().0 % 100_000;
    let path = paths(ctx).archive_path(&vg.name, index, suffix);

    let file = ArchiveFile::new(vg, description, ctx.hostname());
    write_synced(&path, &file.to_json()?)?;
    debug!(vg = %vg.name, path = %path.display(), "archived metadata");

    prune(ctx, &vg.name)?;
    Ok(Some(path))
}

/// Delete the oldest archives beyond `retain_min` that are older than
/// `retain_days`.
fn prune(ctx: &Context, vg: &VgName) -> Result<(), ArchiveError> {
    let entries = list_archives(ctx, vg)?;
    let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(ctx.archive.retain_days));
    let mut remaining = entries.len();

    for entry in entries {
        if remaining <= ctx.archive.retain_min as usize {
            break;
        }
        if *entry.creation_time.as_datetime() > cutoff {
            break;
        }
        debug!(path = %entry.path.display(), "expiring archive");
        fs::remove_file(&entry.path).map_err(io_err(&entry.path))?;
        remaining -= 1;
    }
    Ok(())
}

/// A group's archives, oldest first.
///
/// Files that cannot be read are skipped with a warning.
pub fn list_archives(ctx: &Context, vg: &VgName) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let dir = &ctx.archive.dir;
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir)(e)),
    };

    let mut entries = Vec::new();
    for item in read_dir {
        let item = item.map_err(io_err(dir))?;
        let file_name = item.file_name();
        let Some(index) = file_name
            .to_str()
            .and_then(|name| SystemPaths::parse_archive_index(vg, name))
        else {
            continue;
        };
        let path = item.path();
        match ArchiveFile::read(&path) {
            Ok(file) => entries.push(ArchiveEntry {
                path,
                index,
                description: file.description,
                creation_time: file.creation_time,
                vg_id: file.vg.id,
                seqno: file.vg.seqno,
            }),
            Err(e) => warn!("skipping unreadable archive {}: {}", path.display(), e),
        }
    }
    entries.sort_by_key(|entry| entry.index);
    Ok(entries)
}

/// Replace the group's current backup.
///
/// Returns the backup written, or `None` when backups are disabled or in
/// test mode.
pub fn backup(ctx: &Context, vg: &VolumeGroup) -> Result<Option<PathBuf>, ArchiveError> {
    if !ctx.backup.enabled {
        warn!("WARNING: this metadata update for {} is not backed up", vg.name);
        return Ok(None);
    }
    if ctx.flags.test_mode {
        info!(vg = %vg.name, "test mode: skipping backup");
        return Ok(None);
    }

    let dir = &ctx.backup.dir;
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let paths = paths(ctx);
    let target = paths.backup_path(&vg.name);
    let temp = paths.backup_temp_path(&vg.name);

    let file = ArchiveFile::new(vg, "Created after a metadata change", ctx.hostname());
    write_synced(&temp, &file.to_json()?)?;
    fs::rename(&temp, &target).map_err(io_err(&target))?;
    debug!(vg = %vg.name, path = %target.display(), "backed up metadata");
    Ok(Some(target))
}

/// Read a group's current backup.
pub fn read_backup(ctx: &Context, vg: &VgName) -> Result<ArchiveFile, ArchiveError> {
    let path = paths(ctx).backup_path(vg);
    if !path.exists() {
        return Err(ArchiveError::NoBackup(vg.clone()));
    }
    ArchiveFile::read(&path)
}

/// Bring the backup up to date with the live group.
///
/// Exported groups are left alone.
pub fn check_current_backup(ctx: &Context, vg: &VolumeGroup) -> Result<(), ArchiveError> {
    if vg.status.exported {
        return Ok(());
    }

    let stale = match read_backup(ctx, &vg.name) {
        Ok(file) if file.vg.id == vg.id && file.vg.seqno == vg.seqno => return Ok(()),
        Ok(file) => Some(file.vg),
        Err(ArchiveError::NoBackup(_)) => None,
        Err(e) => {
            warn!("ignoring unreadable backup of {}: {}", vg.name, e);
            None
        }
    };

    if let Some(stale) = stale {
        info!(vg = %vg.name, seqno = stale.seqno, "archiving stale backup");
        archive(ctx, &stale, "Created from a stale backup")?;
    }
    archive(ctx, vg, "Created while checking the current backup")?;
    backup(ctx, vg)?;
    Ok(())
}

/// Write a document back to its PVs.
///
/// The caller must hold the orphan lock and the group's write lock: every
/// listed PV may currently be an orphan. All listed PVs must be present
/// and of the group's format. Labels are rewritten to name the group and
/// the cache is rescanned.
pub fn restore(ctx: &mut Context, vg: VolumeGroup) -> Result<VolumeGroup, ArchiveError> {
    for resource in [LockResource::Orphans, LockResource::for_vg(&vg.name)] {
        if !ctx.holds_write_lock(&resource) {
            return Err(ArchiveError::LockRequired(resource));
        }
    }

    let missing = vg.missing_pv_count();
    if missing > 0 {
        return Err(ArchiveError::MissingPvs {
            vg: vg.name.clone(),
            count: missing,
        });
    }

    let mut labels = Vec::with_capacity(vg.pvs.len());
    for pv in &vg.pvs {
        let info = ctx
            .cache
            .lookup_device(&pv.id, false)
            .ok_or_else(|| ArchiveError::UnknownPv(pv.id.clone()))?;
        if info.format != vg.format {
            return Err(ArchiveError::FormatMismatch {
                pv: pv.id.clone(),
                expected: vg.format.clone(),
                found: info.format.clone(),
            });
        }
        labels.push((
            info.device.clone(),
            Label {
                pv_id: pv.id.clone(),
                format: info.format.clone(),
                sector: info.label_sector,
                size: info.size,
                mda_count: info.mda_count,
                vg: Some(VgSummary {
                    name: vg.name.clone(),
                    id: vg.id.clone(),
                    status: vg.status.clone(),
                    creation_host: vg.creation_host.clone(),
                }),
            },
        ));
    }

    let instance = ctx.instance_for(&vg)?;
    let mut handle = VgHandle::new(vg, instance);
    ctx.vg_write(&mut handle)?;
    if let Err(e) = ctx.vg_commit(&mut handle) {
        if let Err(revert) = ctx.vg_revert(&mut handle) {
            warn!("failed to revert {}: {}", handle.vg.name, revert);
        }
        return Err(e.into());
    }

    if !ctx.flags.test_mode {
        for (device, label) in &labels {
            ctx.registry
                .write_label(device, label)
                .map_err(EngineError::from)?;
        }
    }
    ctx.scan(ScanLevel::Refresh)?;
    info!(vg = %handle.vg.name, seqno = handle.vg.seqno, "restored volume group");
    Ok(handle.vg)
}

/// Restore a group from an archive or backup file.
pub fn restore_from_file(
    ctx: &mut Context,
    vg_name: &VgName,
    path: &Path,
) -> Result<VolumeGroup, ArchiveError> {
    let file = ArchiveFile::read(path)?;
    if &file.vg.name != vg_name {
        return Err(ArchiveError::Parse {
            path: path.to_path_buf(),
            message: format!("file holds {}, not {}", file.vg.name, vg_name),
        });
    }
    restore(ctx, file.vg)
}

/// Restore a group from its current backup.
pub fn restore_from_backup(ctx: &mut Context, vg_name: &VgName) -> Result<VolumeGroup, ArchiveError> {
    let file = read_backup(ctx, vg_name)?;
    restore(ctx, file.vg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metadata::PhysicalVolume;
    use crate::format::FormatRegistry;
    use crate::locking::{LockManager, NoLocking};
    use crate::sim::SimulatedPool;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> Context {
        let pool = SimulatedPool::new();
        let mut formats = FormatRegistry::new();
        formats.register(Arc::new(pool.format(FormatName::new("lvm2").unwrap(), true)));
        let mut ctx = Context::new(
            Config::default(),
            LockManager::new(Box::new(NoLocking::default())),
            Box::new(pool),
            formats,
        );
        ctx.archive.dir = temp.path().join("archive");
        ctx.backup.dir = temp.path().join("backup");
        ctx
    }

    fn vg(seqno: u32) -> VolumeGroup {
        let mut vg = VolumeGroup::new(
            VgName::new("vg0").unwrap(),
            VgId::new("0123456789abcdef0123456789abcdef").unwrap(),
            FormatName::new("lvm2").unwrap(),
            8,
        );
        vg.seqno = seqno;
        vg.pvs
            .push(PhysicalVolume::new(PvId::generate(), "/dev/sda", 0, 100));
        vg
    }

    #[test]
    fn archives_are_numbered_in_sequence() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);

        archive(&ctx, &vg(1), "first").unwrap().unwrap();
        archive(&ctx, &vg(2), "second").unwrap().unwrap();

        let entries = list_archives(&ctx, &VgName::new("vg0").unwrap()).unwrap();
        let indexes: Vec<u32> = entries.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 1]);
        assert_eq!(entries[1].description, "second");
        assert_eq!(entries[1].seqno, 2);
    }

    #[test]
    fn prune_keeps_recent_archives() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp);
        ctx.archive.retain_min = 1;
        ctx.archive.retain_days = 0;

        archive(&ctx, &vg(1), "a").unwrap();
        archive(&ctx, &vg(2), "b").unwrap();
        archive(&ctx, &vg(3), "c").unwrap();

        let entries = list_archives(&ctx, &VgName::new("vg0").unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seqno, 3);
    }

    #[test]
    fn disabled_and_test_mode_write_nothing() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp);
        ctx.archive.enabled = false;
        assert!(archive(&ctx, &vg(1), "x").unwrap().is_none());

        ctx.archive.enabled = true;
        ctx.flags.test_mode = true;
        assert!(archive(&ctx, &vg(1), "x").unwrap().is_none());
        assert!(backup(&ctx, &vg(1)).unwrap().is_none());
        assert!(!temp.path().join("archive").exists());
    }

    #[test]
    fn backup_is_replaced() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);

        backup(&ctx, &vg(1)).unwrap();
        backup(&ctx, &vg(2)).unwrap();
        let file = read_backup(&ctx, &VgName::new("vg0").unwrap()).unwrap();
        assert_eq!(file.vg.seqno, 2);
        assert_eq!(fs::read_dir(temp.path().join("backup")).unwrap().count(), 1);
    }

    #[test]
    fn stale_backup_is_archived_and_replaced() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);

        backup(&ctx, &vg(1)).unwrap();
        check_current_backup(&ctx, &vg(2)).unwrap();

        let name = VgName::new("vg0").unwrap();
        assert_eq!(read_backup(&ctx, &name).unwrap().vg.seqno, 2);
        let seqnos: Vec<u32> = list_archives(&ctx, &name)
            .unwrap()
            .iter()
            .map(|e| e.seqno)
            .collect();
        assert_eq!(seqnos, vec![1, 2]);

        // already current: nothing new
        check_current_backup(&ctx, &vg(2)).unwrap();
        assert_eq!(list_archives(&ctx, &name).unwrap().len(), 2);
    }

    #[test]
    fn exported_groups_are_skipped() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let mut exported = vg(1);
        exported.status.exported = true;

        check_current_backup(&ctx, &exported).unwrap();
        assert!(matches!(
            read_backup(&ctx, &exported.name),
            Err(ArchiveError::NoBackup(_))
        ));
    }

    #[test]
    fn restore_needs_both_locks() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp);
        let err = restore(&mut ctx, vg(1)).unwrap_err();
        assert!(matches!(err, ArchiveError::LockRequired(LockResource::Orphans)));
    }
}
