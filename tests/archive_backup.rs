//! Archive, backup and restore against the simulated pool.

mod common;

use common::{vg_name, Fixture};

use vgcache::archive::{self, ArchiveError, ArchiveFile};
use vgcache::cache::ScanLevel;
use vgcache::core::metadata::VolumeGroup;
use vgcache::core::types::LockResource;
use vgcache::engine::{Context, ReadOptions};
use vgcache::locking::LockMode;

/// Take the locks restore needs, in order.
fn lock_for_restore(ctx: &mut Context, vg: &VolumeGroup) {
    ctx.lock(&LockResource::for_vg(&vg.name), LockMode::Write)
        .unwrap();
    ctx.lock(&LockResource::Orphans, LockMode::Write).unwrap();
}

/// Forget every committed copy of the group, as a wiped disk would.
fn wipe(fx: &Fixture, vg: &VolumeGroup) {
    for pv in &vg.pvs {
        let path = fx.device_of(&pv.id);
        fx.pool.set_committed(&path, 0, None).unwrap();
    }
}

#[test]
fn write_then_backup_records_the_new_seqno() {
    let mut fx = Fixture::new();
    let pvs = fx.add_pvs(2, 1);
    let doc = fx.create_vg("vg0", &pvs, 4);

    let mut ctx = fx.context();
    let mut handle = ctx
        .lock_and_read(&doc.name, LockMode::Write, ReadOptions::default())
        .unwrap();
    archive::archive(&ctx, &handle.vg, "before resize").unwrap();
    handle.vg.extent_size = 16;
    ctx.vg_write(&mut handle).unwrap();
    ctx.vg_commit(&mut handle).unwrap();
    archive::backup(&ctx, &handle.vg).unwrap();

    let backup = archive::read_backup(&ctx, &doc.name).unwrap();
    assert_eq!(backup.vg.seqno, 5);
    assert_eq!(backup.vg.extent_size, 16);
    assert_eq!(backup.creation_host, common::HOST);

    let archives = archive::list_archives(&ctx, &doc.name).unwrap();
    assert_eq!(archives.len(), 1);
    assert_eq!(archives[0].seqno, 4);
    assert_eq!(archives[0].description, "before resize");
}

#[test]
fn check_current_backup_catches_up_after_unrecorded_write() {
    let mut fx = Fixture::new();
    let pvs = fx.add_pvs(1, 2);
    let doc = fx.create_vg("vg0", &pvs, 1);

    let mut ctx = fx.context();
    let mut handle = ctx
        .lock_and_read(&doc.name, LockMode::Write, ReadOptions::default())
        .unwrap();
    archive::backup(&ctx, &handle.vg).unwrap();

    // a write nobody backed up
    ctx.vg_write(&mut handle).unwrap();
    ctx.vg_commit(&mut handle).unwrap();

    archive::check_current_backup(&ctx, &handle.vg).unwrap();
    assert_eq!(archive::read_backup(&ctx, &doc.name).unwrap().vg.seqno, 2);

    let seqnos: Vec<u32> = archive::list_archives(&ctx, &doc.name)
        .unwrap()
        .iter()
        .map(|entry| entry.seqno)
        .collect();
    assert_eq!(seqnos, vec![1, 2]);

    // nothing further to do once the backup is current
    archive::check_current_backup(&ctx, &handle.vg).unwrap();
    assert_eq!(archive::list_archives(&ctx, &doc.name).unwrap().len(), 2);
}

#[test]
fn restore_from_backup_rebuilds_wiped_group() {
    let mut fx = Fixture::new();
    let pvs = fx.add_pvs(2, 1);
    let doc = fx.create_vg("vg0", &pvs, 3);

    let mut ctx = fx.context();
    let handle = ctx
        .lock_and_read(&doc.name, LockMode::Read, ReadOptions::default())
        .unwrap();
    archive::backup(&ctx, &handle.vg).unwrap();
    ctx.end_command().unwrap();

    wipe(&fx, &doc);
    let mut ctx = fx.context();
    ctx.scan(ScanLevel::Refresh).unwrap();
    assert!(ctx.cache.lookup_group_by_name(&doc.name, None).is_none());

    lock_for_restore(&mut ctx, &doc);
    let restored = archive::restore_from_backup(&mut ctx, &doc.name).unwrap();
    assert_eq!(restored.id, doc.id);
    assert_eq!(restored.seqno, 4);

    for pv in &pvs {
        let on_disk = fx.pool.committed(&fx.device_of(pv), 0).unwrap();
        assert_eq!(on_disk.seqno, 4);
        assert_eq!(ctx.cache.lookup_device(pv, false).unwrap().group(), &doc.id);
    }
    ctx.end_command().unwrap();

    let mut ctx = fx.context();
    let read = ctx
        .lock_and_read(&doc.name, LockMode::Read, ReadOptions::default())
        .unwrap();
    assert!(read.consistent);
    assert_eq!(read.vg.seqno, 4);
}

#[test]
fn restore_from_archive_file() {
    let mut fx = Fixture::new();
    let pvs = fx.add_pvs(1, 1);
    let doc = fx.create_vg("vg0", &pvs, 7);

    let mut ctx = fx.context();
    let handle = ctx
        .lock_and_read(&doc.name, LockMode::Read, ReadOptions::default())
        .unwrap();
    let path = archive::archive(&ctx, &handle.vg, "snapshot")
        .unwrap()
        .expect("archive written");
    ctx.end_command().unwrap();

    let file = ArchiveFile::read(&path).unwrap();
    assert_eq!(file.vg.id, doc.id);
    assert_eq!(file.vg.seqno, 7);
    assert_eq!(file.description, "snapshot");

    wipe(&fx, &doc);
    let mut ctx = fx.context();
    ctx.scan(ScanLevel::Refresh).unwrap();
    lock_for_restore(&mut ctx, &doc);
    let restored = archive::restore_from_file(&mut ctx, &doc.name, &path).unwrap();
    assert_eq!(restored.seqno, 8);
    assert!(ctx.cache.lookup_group_by_name(&doc.name, None).is_some());
}

#[test]
fn restore_from_file_checks_group_name() {
    let mut fx = Fixture::new();
    let pvs = fx.add_pvs(1, 1);
    let doc = fx.create_vg("vg0", &pvs, 1);

    let mut ctx = fx.context();
    let handle = ctx
        .lock_and_read(&doc.name, LockMode::Read, ReadOptions::default())
        .unwrap();
    let path = archive::archive(&ctx, &handle.vg, "snapshot")
        .unwrap()
        .expect("archive written");
    ctx.end_command().unwrap();

    let other = vg_name("other");
    let mut ctx = fx.context();
    ctx.lock(&LockResource::for_vg(&other), LockMode::Write)
        .unwrap();
    ctx.lock(&LockResource::Orphans, LockMode::Write).unwrap();
    assert!(archive::restore_from_file(&mut ctx, &other, &path).is_err());
}

#[test]
fn restore_refuses_when_a_pv_is_gone() {
    let mut fx = Fixture::new();
    let pvs = fx.add_pvs(2, 1);
    let doc = fx.create_vg("vg0", &pvs, 1);

    let mut ctx = fx.context();
    let handle = ctx
        .lock_and_read(&doc.name, LockMode::Read, ReadOptions::default())
        .unwrap();
    archive::backup(&ctx, &handle.vg).unwrap();
    ctx.end_command().unwrap();

    fx.pool.unplug(&fx.device_of(&pvs[1]));
    let mut ctx = fx.context();
    ctx.scan(ScanLevel::Refresh).unwrap();
    lock_for_restore(&mut ctx, &doc);

    let err = archive::restore_from_backup(&mut ctx, &doc.name).unwrap_err();
    assert!(matches!(err, ArchiveError::UnknownPv(ref pv) if pv == &pvs[1]));
    assert!(err.hint().is_some());

    // the surviving PV was not touched
    let survivor = fx.pool.committed(&fx.device_of(&pvs[0]), 0).unwrap();
    assert_eq!(survivor.seqno, 1);
}

#[test]
fn restore_without_backup_reports_it() {
    let mut fx = Fixture::new();
    let pvs = fx.add_pvs(1, 1);
    let doc = fx.create_vg("vg0", &pvs, 1);

    let mut ctx = fx.context();
    ctx.scan(ScanLevel::Refresh).unwrap();
    lock_for_restore(&mut ctx, &doc);
    let err = archive::restore_from_backup(&mut ctx, &doc.name).unwrap_err();
    assert!(matches!(err, ArchiveError::NoBackup(_)));
}
