//! Shared fixtures for integration tests.
//!
//! A [`Fixture`] owns a simulated pool and a temporary directory for lock
//! files, archives and backups. Contexts built from it all see the same
//! pool, the way separate commands see the same disks.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use vgcache::core::config::Config;
use vgcache::core::metadata::{PhysicalVolume, VolumeGroup};
use vgcache::core::paths::SystemPaths;
use vgcache::core::types::{FormatName, PvId, VgId, VgName};
use vgcache::device::Device;
use vgcache::engine::Context;
use vgcache::format::FormatRegistry;
use vgcache::locking::{FileLocking, LockManager, NoLocking};
use vgcache::sim::SimulatedPool;

pub const HOST: &str = "testhost";

pub fn lvm2() -> FormatName {
    FormatName::new("lvm2").unwrap()
}

pub fn vg_name(name: &str) -> VgName {
    VgName::new(name).unwrap()
}

/// Path of the n-th simulated device: `/dev/sda`, `/dev/sdb`, ...
pub fn dev_path(n: usize) -> PathBuf {
    PathBuf::from(format!("/dev/sd{}", (b'a' + n as u8) as char))
}

pub struct Fixture {
    pub pool: SimulatedPool,
    pub temp: TempDir,
    next_device: usize,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            pool: SimulatedPool::new(),
            temp: TempDir::new().expect("create temp dir"),
            next_device: 0,
        }
    }

    pub fn paths(&self) -> SystemPaths {
        SystemPaths::new(
            self.temp.path().join("lock"),
            self.temp.path().join("backup"),
            self.temp.path().join("archive"),
        )
    }

    fn formats(&self, precommit: bool) -> FormatRegistry {
        let mut formats = FormatRegistry::new();
        formats.register(Arc::new(self.pool.format(lvm2(), precommit)));
        formats
    }

    fn assemble(&self, locking: LockManager, precommit: bool) -> Context {
        let mut config = Config::default();
        config.file.global = Some(vgcache::core::config::GlobalSection {
            hostname: Some(HOST.to_string()),
            ..Default::default()
        });
        let mut ctx = Context::new(
            config,
            locking,
            Box::new(self.pool.clone()),
            self.formats(precommit),
        );
        let paths = self.paths();
        ctx.archive.dir = paths.archive_dir;
        ctx.backup.dir = paths.backup_dir;
        ctx
    }

    /// A context whose format supports precommit, with no inter-process
    /// locking.
    pub fn context(&self) -> Context {
        self.assemble(LockManager::new(Box::new(NoLocking::default())), true)
    }

    /// A context whose format has no precommit phase.
    pub fn context_without_precommit(&self) -> Context {
        self.assemble(LockManager::new(Box::new(NoLocking::default())), false)
    }

    /// A context using lock files in the fixture directory.
    pub fn file_locked_context(&self, wait: bool) -> Context {
        let backend = FileLocking::new(self.paths(), wait);
        self.assemble(LockManager::new(Box::new(backend)), true)
    }

    /// Add `count` PVs with `mdas` metadata areas each.
    pub fn add_pvs(&mut self, count: usize, mdas: usize) -> Vec<PvId> {
        (0..count)
            .map(|_| {
                let pv = PvId::generate();
                let path = dev_path(self.next_device);
                self.next_device += 1;
                self.pool
                    .add_pv(
                        Device::new(path, self.next_device as u64),
                        pv.clone(),
                        lvm2(),
                        2048,
                        mdas,
                    )
                    .expect("add pv");
                pv
            })
            .collect()
    }

    /// Commit a group over `pvs` straight to disk.
    pub fn create_vg(&self, name: &str, pvs: &[PvId], seqno: u32) -> VolumeGroup {
        let vg = vg_doc(name, &VgId::generate(), &self.pool, pvs, seqno);
        self.pool.create_vg(&vg).expect("create vg");
        vg
    }

    pub fn device_of(&self, pv: &PvId) -> PathBuf {
        self.pool.device_of(pv).expect("pv present").device.path
    }
}

/// A group document over `pvs` as the pool currently places them.
pub fn vg_doc(
    name: &str,
    id: &VgId,
    pool: &SimulatedPool,
    pvs: &[PvId],
    seqno: u32,
) -> VolumeGroup {
    let mut vg = VolumeGroup::new(vg_name(name), id.clone(), lvm2(), 8);
    vg.seqno = seqno;
    vg.creation_host = Some(HOST.to_string());
    vg.status.resizeable = true;
    for pv in pvs {
        let path = pool
            .device_of(pv)
            .map(|d| d.device.path)
            .unwrap_or_else(|| Path::new("/dev/missing").to_path_buf());
        vg.pvs.push(PhysicalVolume::new(pv.clone(), path, 384, 255));
    }
    vg
}
