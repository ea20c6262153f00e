//! Integration tests for the lock manager over real lock files.
//!
//! Two contexts in one test stand in for two processes: each opens its own
//! lock file descriptors, and flock-style locks on separate descriptors
//! conflict just as they would between processes.

mod common;

use std::time::{Duration, Instant};

use common::{vg_name, Fixture};

use vgcache::cache::ScanLevel;
use vgcache::core::types::LockResource;
use vgcache::engine::{EngineError, ReadOptions};
use vgcache::locking::{LockError, LockFlags, LockMode};

fn vg(name: &str) -> LockResource {
    LockResource::for_vg(&vg_name(name))
}

#[test]
fn lock_files_follow_resource_names() {
    let fx = Fixture::new();
    let mut ctx = fx.file_locked_context(true);

    ctx.lock(&LockResource::Global, LockMode::Read).unwrap();
    ctx.lock(&vg("vg0"), LockMode::Write).unwrap();
    ctx.lock(&LockResource::Orphans, LockMode::Write).unwrap();
    assert_eq!(ctx.locking.query(&vg("vg0")), Some(LockMode::Write));
    assert_eq!(ctx.locking.query(&LockResource::Global), Some(LockMode::Read));

    let dir = fx.paths().locking_dir;
    assert!(dir.join("P_global").exists());
    assert!(dir.join("V_vg0").exists());
    assert!(dir.join("P_orphans").exists());
    assert_eq!(ctx.cache.locks().vgs_locked(), 2);

    ctx.end_command().unwrap();
    assert!(ctx.cache.locks().is_empty());
}

#[test]
fn second_vg_lock_never_blocks() {
    let fx = Fixture::new();
    let mut holder = fx.file_locked_context(true);
    holder.lock(&vg("b"), LockMode::Write).unwrap();

    let mut ctx = fx.file_locked_context(true);
    ctx.lock(&vg("a"), LockMode::Write).unwrap();

    let started = Instant::now();
    let err = ctx.lock(&vg("b"), LockMode::Write).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        err,
        EngineError::Lock(LockError::WouldBlock { .. })
    ));
    assert!(err.hint().is_some());

    // the lock already held is untouched
    assert!(ctx.holds_write_lock(&vg("a")));
    assert!(!ctx.holds_write_lock(&vg("b")));
}

#[test]
fn global_lock_does_not_count_as_vg() {
    let fx = Fixture::new();
    let mut holder = fx.file_locked_context(true);
    holder.lock(&vg("a"), LockMode::Write).unwrap();

    let mut ctx = fx.file_locked_context(true);
    ctx.lock(&LockResource::Global, LockMode::Write).unwrap();
    assert_eq!(ctx.cache.locks().vgs_locked(), 0);

    // a non-blocking request still fails fast against the holder
    let err = ctx
        .lock_with(&vg("a"), LockMode::Write, LockFlags::non_blocking())
        .unwrap_err();
    assert!(matches!(err, EngineError::Lock(LockError::WouldBlock { .. })));
}

#[test]
fn readers_share_writers_exclude() {
    let fx = Fixture::new();
    let mut first = fx.file_locked_context(false);
    let mut second = fx.file_locked_context(false);

    first.lock(&vg("vg0"), LockMode::Read).unwrap();
    second.lock(&vg("vg0"), LockMode::Read).unwrap();
    assert!(second.lock(&vg("vg0"), LockMode::Write).is_err());

    second.unlock(&vg("vg0")).unwrap();
    first.lock(&vg("vg0"), LockMode::Write).unwrap();
    assert!(first.holds_write_lock(&vg("vg0")));
}

#[test]
fn out_of_order_request_is_refused() {
    let fx = Fixture::new();
    let mut ctx = fx.file_locked_context(true);
    ctx.lock(&vg("m"), LockMode::Read).unwrap();

    let err = ctx.lock(&vg("c"), LockMode::Read).unwrap_err();
    assert!(err.is_internal());
    assert!(!fx.paths().locking_dir.join("V_c").exists());

    assert_eq!(ctx.locking.query(&vg("c")), None);

    // later names and the orphan resource are fine
    ctx.lock(&vg("z"), LockMode::Read).unwrap();
    ctx.lock(&LockResource::Orphans, LockMode::Read).unwrap();
}

#[test]
fn relock_in_same_mode_is_ignorable() {
    let fx = Fixture::new();
    let mut ctx = fx.file_locked_context(true);
    ctx.lock(&vg("vg0"), LockMode::Read).unwrap();

    let err = ctx.lock(&vg("vg0"), LockMode::Read).unwrap_err();
    assert!(err.is_internal());
    assert_eq!(ctx.cache.locks().mode(&vg("vg0")), Some(LockMode::Read));

    // a mode change converts
    ctx.lock(&vg("vg0"), LockMode::Write).unwrap();
    assert!(ctx.holds_write_lock(&vg("vg0")));
}

#[test]
fn locking_a_group_drops_its_cached_metadata() {
    let mut fx = Fixture::new();
    let pvs = fx.add_pvs(2, 1);
    let doc = fx.create_vg("vg0", &pvs, 1);

    let mut ctx = fx.file_locked_context(true);
    ctx.scan(ScanLevel::Refresh).unwrap();
    assert!(ctx.cache.get_cached_group(&doc.id, false).is_some());

    ctx.lock(&vg("vg0"), LockMode::Read).unwrap();
    assert!(ctx.cache.get_cached_group(&doc.id, false).is_none());

    // re-reading under the lock makes the cache trustworthy again
    ctx.vg_read(&doc.name, None, ReadOptions::default()).unwrap();
    assert!(ctx.cache.get_cached_group(&doc.id, false).is_some());
}

#[test]
fn cache_only_lock_touches_no_file() {
    let fx = Fixture::new();
    let mut ctx = fx.file_locked_context(true);
    ctx.lock_with(&vg("vg0"), LockMode::Read, LockFlags::cache_only())
        .unwrap();
    assert_eq!(ctx.locking.query(&vg("vg0")), None);

    assert_eq!(ctx.cache.locks().mode(&vg("vg0")), Some(LockMode::Read));
    assert!(!fx.paths().locking_dir.join("V_vg0").exists());
}

#[test]
fn reset_releases_everything() {
    let fx = Fixture::new();
    let mut ctx = fx.file_locked_context(true);
    ctx.lock(&vg("vg0"), LockMode::Write).unwrap();
    ctx.reset(true).unwrap();
    assert!(ctx.cache.locks().is_empty());

    let mut other = fx.file_locked_context(false);
    other.lock(&vg("vg0"), LockMode::Write).unwrap();
}
