/*!
 * Resource Table Tests
 * Slot lifecycle, nested protection, and homeostatic self-repair driven
 * by manual quantum delivery
 */

mod common;

use common::recording_ledger;
use pretty_assertions::assert_eq;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vigil::resources::{Homeostat, Hooks, ResourceError, SpacePolicy};
use vigil::timers::TimerMultiplexer;
use vigil::{AccessMode, FsOps, PosixFs, ResourceTable};

fn setup(capacity: usize) -> (ResourceTable, TimerMultiplexer, TempDir) {
    let (ledger, _mask) = recording_ledger();
    let mux = TimerMultiplexer::new(16, ledger.clone());
    let table = ResourceTable::new(
        capacity,
        mux.clone(),
        ledger,
        Arc::new(PosixFs::new()),
        1, // poll every quantum so each dispatch runs the homeostat
        Duration::from_millis(10),
    );
    (table, mux, tempfile::tempdir().unwrap())
}

fn touch(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, b"payload").unwrap();
    path
}

#[test]
fn acquire_records_slot_beyond_reserved() {
    let (table, _mux, dir) = setup(8);
    let path = touch(&dir, "journal");

    let id = table.acquire(&path, AccessMode::Write).unwrap();
    assert!(id >= 3);
    let info = table.info(id).unwrap();
    assert_eq!(info.primary, path);
    assert!(info.named);
    assert!(info.alive);
    assert_eq!(info.protection, 0);
}

#[test]
fn reserved_slot_toggles_back_alive() {
    let (table, _mux, _dir) = setup(8);

    table.make_alive(1, "stdout-guard", Homeostat::Default).unwrap();
    table.make_dead(1).unwrap();
    assert!(!table.info(1).unwrap().alive);

    // dead is a reversible state for reserved stream slots
    table.make_alive(1, "stdout-guard", Homeostat::Default).unwrap();
    assert!(table.info(1).unwrap().alive);
    assert_eq!(table.protection(1).unwrap(), 1);
    table.make_dead(1).unwrap();
}

#[test]
fn reserved_slots_exist_and_cannot_be_closed() {
    let (table, _mux, _dir) = setup(8);
    for slot in 0..3 {
        assert!(table.info(slot).is_ok());
        assert!(matches!(table.close(slot), Err(ResourceError::Reserved(_))));
        assert!(matches!(
            table.make_dead(slot),
            Err(ResourceError::NotProtected(_))
        ));
    }
}

#[test]
fn nested_protection_round_trip_removes_shadow() {
    let (table, _mux, dir) = setup(8);
    let path = touch(&dir, "state");
    let id = table.acquire(&path, AccessMode::Write).unwrap();

    for _ in 0..3 {
        table.make_alive(id, "state-homeostat", Homeostat::Default).unwrap();
    }
    assert_eq!(table.protection(id).unwrap(), 3);
    let shadow = table.shadow_of(id).unwrap();
    assert_eq!(shadow, dir.path().join(".state.shadow"));
    assert!(shadow.exists());

    for _ in 0..2 {
        table.make_dead(id).unwrap();
    }
    // still protected; shadow stays
    assert_eq!(table.protection(id).unwrap(), 1);
    assert!(shadow.exists());

    table.make_dead(id).unwrap();
    assert!(!shadow.exists());
    // non-reserved slot is cleared entirely
    assert!(matches!(table.info(id), Err(ResourceError::NoSuchSlot(_))));
}

#[test]
fn homeostat_restores_deleted_primary() {
    let (table, mux, dir) = setup(8);
    let path = touch(&dir, "precious");
    let id = table.acquire(&path, AccessMode::Write).unwrap();
    table.make_alive(id, "precious-homeostat", Homeostat::Default).unwrap();

    fs::remove_file(&path).unwrap();
    assert!(!path.exists());

    mux.dispatch();
    assert!(path.exists(), "primary relinked from shadow");
    assert_eq!(table.lost_count(id).unwrap(), 1);
    assert_eq!(fs::read(&path).unwrap(), b"payload");

    // an undamaged poll does not inflate the lost count
    mux.dispatch();
    assert_eq!(table.lost_count(id).unwrap(), 1);
}

#[test]
fn homeostat_restores_deleted_shadow() {
    let (table, mux, dir) = setup(8);
    let path = touch(&dir, "ledger");
    let id = table.acquire(&path, AccessMode::Write).unwrap();
    table.make_alive(id, "ledger-homeostat", Homeostat::Default).unwrap();

    let shadow = table.shadow_of(id).unwrap();
    fs::remove_file(&shadow).unwrap();

    mux.dispatch();
    assert!(shadow.exists(), "shadow relinked from primary");
    assert_eq!(table.lost_count(id).unwrap(), 0);
}

#[test]
fn homeostat_repairs_permission_bits() {
    let (table, mux, dir) = setup(8);
    let path = touch(&dir, "modefile");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

    let id = table.acquire(&path, AccessMode::Write).unwrap();
    table.make_alive(id, "mode-homeostat", Homeostat::Default).unwrap();

    fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
    mux.dispatch();

    let bits = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
    assert_eq!(bits, 0o644);
}

#[test]
fn locate_hook_takes_precedence_over_shadow() {
    let (table, mux, dir) = setup(8);
    let path = touch(&dir, "wandering");
    let relocated = touch(&dir, "wandering.moved");

    let id = table.acquire(&path, AccessMode::Write).unwrap();
    table.make_alive(id, "wander-homeostat", Homeostat::Default).unwrap();

    let target = relocated.clone();
    table.set_hooks(Hooks {
        locate: Some(Arc::new(move |_lost| Some(target.clone()))),
        ..Default::default()
    });

    fs::remove_file(&path).unwrap();
    mux.dispatch();

    let info = table.info(id).unwrap();
    assert_eq!(info.primary, relocated);
    assert_eq!(info.lost_count, 1);
    // the old name stays gone; the hook owned the recovery
    assert!(!path.exists());
}

#[test]
fn custom_homeostat_payload_runs_instead_of_default() {
    let (table, mux, dir) = setup(8);
    let path = touch(&dir, "custom");
    let id = table.acquire(&path, AccessMode::Write).unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = seen.clone();
    table
        .make_alive(
            id,
            "custom-homeostat",
            Homeostat::Custom(Arc::new(move |slot| log.lock().push(slot))),
        )
        .unwrap();

    // damage that the default payload would repair
    fs::remove_file(&path).unwrap();
    mux.dispatch();

    assert_eq!(seen.lock().as_slice(), &[id]);
    assert!(!path.exists(), "custom payload does not relink");
}

#[test]
fn duplicate_homeostat_name_rolls_back_protection() {
    let (table, _mux, dir) = setup(8);
    let first = touch(&dir, "one");
    let second = touch(&dir, "two");
    let a = table.acquire(&first, AccessMode::Write).unwrap();
    let b = table.acquire(&second, AccessMode::Write).unwrap();

    table.make_alive(a, "shared-name", Homeostat::Default).unwrap();
    let err = table.make_alive(b, "shared-name", Homeostat::Default).unwrap_err();
    assert!(matches!(err, ResourceError::Timer(_)));

    assert_eq!(table.protection(b).unwrap(), 0);
    assert!(table.shadow_of(b).is_none());
    assert!(!dir.path().join(".two.shadow").exists());
    // the first protection is untouched
    assert_eq!(table.protection(a).unwrap(), 1);
}

#[test]
fn table_full_is_reported() {
    let (table, _mux, dir) = setup(4); // 3 reserved + 1 free
    let first = touch(&dir, "fits");
    let second = touch(&dir, "overflow");

    table.acquire(&first, AccessMode::Read).unwrap();
    assert!(matches!(
        table.acquire(&second, AccessMode::Read),
        Err(ResourceError::TableFull)
    ));
}

#[test]
fn close_tears_down_protection() {
    let (table, mux, dir) = setup(8);
    let path = touch(&dir, "closing");
    let id = table.acquire(&path, AccessMode::Write).unwrap();
    table.make_alive(id, "closing-homeostat", Homeostat::Default).unwrap();
    let shadow = table.shadow_of(id).unwrap();

    table.close(id).unwrap();
    assert!(!shadow.exists());
    assert!(matches!(table.info(id), Err(ResourceError::NoSuchSlot(_))));
    assert_eq!(mux.len(), 0, "homeostat timer cancelled");
}

/// Real filesystem with a switchable "out of space" answer
struct LowSpaceFs {
    inner: PosixFs,
    full: AtomicBool,
}

impl LowSpaceFs {
    fn new() -> Self {
        Self {
            inner: PosixFs::new(),
            full: AtomicBool::new(false),
        }
    }
}

impl FsOps for LowSpaceFs {
    fn hard_link(&self, target: &Path, link: &Path) -> io::Result<()> {
        self.inner.hard_link(target, link)
    }
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        self.inner.symlink(target, link)
    }
    fn unlink(&self, path: &Path) -> io::Result<()> {
        self.inner.unlink(path)
    }
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }
    fn nlink(&self, path: &Path) -> io::Result<u64> {
        self.inner.nlink(path)
    }
    fn mode_bits(&self, path: &Path) -> io::Result<u32> {
        self.inner.mode_bits(path)
    }
    fn set_mode_bits(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.set_mode_bits(path, mode)
    }
    fn read_dir_names(&self, dir: &Path) -> io::Result<Vec<String>> {
        self.inner.read_dir_names(dir)
    }
    fn free_blocks(&self, path: &Path) -> io::Result<u64> {
        if self.full.load(Ordering::SeqCst) {
            Ok(0)
        } else {
            self.inner.free_blocks(path)
        }
    }
    fn is_read_only(&self, path: &Path) -> io::Result<bool> {
        self.inner.is_read_only(path)
    }
}

fn setup_low_space() -> (ResourceTable, TimerMultiplexer, Arc<LowSpaceFs>, TempDir) {
    let (ledger, _mask) = recording_ledger();
    let mux = TimerMultiplexer::new(16, ledger.clone());
    let fs_ops = Arc::new(LowSpaceFs::new());
    let table = ResourceTable::new(
        8,
        mux.clone(),
        ledger,
        fs_ops.clone(),
        1,
        Duration::from_millis(10),
    );
    (table, mux, fs_ops, tempfile::tempdir().unwrap())
}

#[test]
fn migrate_policy_rebinds_primary_when_filesystem_full() {
    let (table, mux, fs_ops, dir) = setup_low_space();
    let path = touch(&dir, "swelling");
    let id = table.acquire(&path, AccessMode::Write).unwrap();
    table.make_alive(id, "swell-homeostat", Homeostat::Default).unwrap();

    let relocated = dir.path().join("swelling.migrated");
    let target = relocated.clone();
    table.set_hooks(Hooks {
        space: SpacePolicy::Migrate(Arc::new(move |old: &Path| {
            fs::rename(old, &target)?;
            Ok(target.clone())
        })),
        ..Default::default()
    });

    fs_ops.full.store(true, Ordering::SeqCst);
    mux.dispatch();

    let info = table.info(id).unwrap();
    assert_eq!(info.primary, relocated);
    assert!(relocated.exists());
    // the migrated-away name is not resurrected by primary recovery
    assert!(!path.exists());
    assert_eq!(info.lost_count, 0);

    // once space returns the migrated file is left alone
    fs_ops.full.store(false, Ordering::SeqCst);
    mux.dispatch();
    assert_eq!(table.info(id).unwrap().primary, relocated);
}

#[test]
fn full_filesystem_with_default_policy_only_warns() {
    let (table, mux, fs_ops, dir) = setup_low_space();
    let path = touch(&dir, "swelling");
    let id = table.acquire(&path, AccessMode::Write).unwrap();
    table.make_alive(id, "swell-homeostat", Homeostat::Default).unwrap();

    fs_ops.full.store(true, Ordering::SeqCst);
    // must return: the default policy neither stops this process group
    // nor touches the file
    mux.dispatch();

    let info = table.info(id).unwrap();
    assert_eq!(info.primary, path);
    assert_eq!(info.lost_count, 0);
    assert!(path.exists());
}

#[test]
fn release_all_keeps_reserved_entries() {
    let (table, mux, dir) = setup(8);
    let path = touch(&dir, "transient");
    let id = table.acquire(&path, AccessMode::Write).unwrap();
    table.make_alive(id, "transient-homeostat", Homeostat::Default).unwrap();

    table.release_all();

    assert!(matches!(table.info(id), Err(ResourceError::NoSuchSlot(_))));
    assert_eq!(mux.len(), 0);
    for slot in 0..3 {
        let info = table.info(slot).unwrap();
        assert!(!info.alive, "reserved slot {} marked dead, not destroyed", slot);
    }
}
