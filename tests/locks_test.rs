/*!
 * Lock Manager Tests
 * The hard-link protocol, reader/writer exclusion, stale-owner
 * scavenging, and attempt budgets
 */

mod common;

use common::recording_ledger;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vigil::locks::{LockError, OwnerMarker};
use vigil::{Budget, Identity, LockKind, LockManager, LockOutcome, NullRelay, PosixFs, SignalRelay};

fn manager(identity: Identity) -> LockManager {
    manager_with_relay(identity, Arc::new(NullRelay))
}

fn manager_with_relay(identity: Identity, relay: Arc<dyn SignalRelay>) -> LockManager {
    let (ledger, _mask) = recording_ledger();
    LockManager::new(identity, Arc::new(PosixFs::new()), relay, ledger)
        .with_backoff(Duration::from_millis(1))
}

fn local_identity(app: &str) -> Identity {
    Identity::local(app)
}

fn target(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("data");
    fs::write(&path, b"shared state").unwrap();
    path
}

/// Relay double declaring every remote owner dead
struct DeadRelay;

impl SignalRelay for DeadRelay {
    fn alive(&self, _marker: &OwnerMarker) -> bool {
        false
    }
}

#[test]
fn write_lock_creates_contract_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let manager = manager(local_identity("writer"));

    let outcome = manager
        .acquire(&path, LockKind::Write, Budget::TryOnce)
        .unwrap();
    assert_eq!(outcome, LockOutcome::Held);

    // on-disk names are a bit-for-bit compatibility contract
    assert!(dir.path().join("data.lock").exists());
    let identity = local_identity("writer");
    let marker = dir
        .path()
        .join(OwnerMarker::file_name_for("data", &identity));
    assert!(marker.exists());

    // target + lock link + marker all share the inode
    let nlink = std::os::unix::fs::MetadataExt::nlink(&fs::metadata(&path).unwrap());
    assert_eq!(nlink, 3);

    manager.release(&path).unwrap();
    assert!(!dir.path().join("data.lock").exists());
    assert!(!marker.exists());
}

#[test]
fn writers_exclude_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let first = manager(local_identity("alpha"));
    let second = manager(local_identity("beta"));

    first
        .acquire(&path, LockKind::Write, Budget::TryOnce)
        .unwrap();
    assert!(matches!(
        second.acquire(&path, LockKind::Write, Budget::TryOnce),
        Err(LockError::Busy(_))
    ));

    first.release(&path).unwrap();
    assert_eq!(
        second
            .acquire(&path, LockKind::Write, Budget::TryOnce)
            .unwrap(),
        LockOutcome::Held
    );
}

#[test]
fn readers_coexist_and_exclude_writers() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let reader_a = manager(local_identity("reader_a"));
    let reader_b = manager(local_identity("reader_b"));
    let writer = manager(local_identity("writer"));

    // two distinct owners both obtain the read lock
    reader_a
        .acquire(&path, LockKind::Read, Budget::TryOnce)
        .unwrap();
    reader_b
        .acquire(&path, LockKind::Read, Budget::TryOnce)
        .unwrap();
    assert!(dir.path().join("data.rdlock").exists());

    // a writer stays busy while any reader holds the path
    assert!(matches!(
        writer.acquire(&path, LockKind::Write, Budget::TryOnce),
        Err(LockError::Busy(_))
    ));

    reader_a.release(&path).unwrap();
    assert!(matches!(
        writer.acquire(&path, LockKind::Write, Budget::TryOnce),
        Err(LockError::Busy(_))
    ));

    // releasing the last reader clears the way
    reader_b.release(&path).unwrap();
    assert!(!dir.path().join("data.rdlock").exists());
    assert_eq!(
        writer
            .acquire(&path, LockKind::Write, Budget::TryOnce)
            .unwrap(),
        LockOutcome::Held
    );
}

#[test]
fn readers_excluded_while_writer_holds() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let writer = manager(local_identity("writer"));
    let reader = manager(local_identity("reader"));

    writer
        .acquire(&path, LockKind::Write, Budget::TryOnce)
        .unwrap();
    assert!(matches!(
        reader.acquire(&path, LockKind::Read, Budget::TryOnce),
        Err(LockError::Busy(_))
    ));
}

#[test]
fn attempt_budget_exhaustion_leaves_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let holder = manager(local_identity("holder"));
    let contender_id = local_identity("contender");
    let contender = manager(contender_id.clone());

    holder
        .acquire(&path, LockKind::Write, Budget::TryOnce)
        .unwrap();
    assert!(matches!(
        contender.acquire(&path, LockKind::Write, Budget::Attempts(3)),
        Err(LockError::Busy(_))
    ));

    // no marker or record left behind by the failed attempts
    let marker = dir
        .path()
        .join(OwnerMarker::file_name_for("data", &contender_id));
    assert!(!marker.exists());
    assert!(contender.held_kind(&path).is_none());
    assert!(contender.snapshot().is_empty());
}

#[test]
fn dead_remote_owner_is_purged_on_next_acquire() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);

    // fabricate an on-disk lock held by a remote process
    let remote = Identity {
        app: "ghost".to_string(),
        host: "faraway".to_string(),
        port: Some(7000),
        pid: 12345,
    };
    fs::hard_link(&path, dir.path().join("data.lock")).unwrap();
    fs::hard_link(
        &path,
        dir.path().join(OwnerMarker::file_name_for("data", &remote)),
    )
    .unwrap();

    // a relay that reports the owner alive keeps the lock intact
    let blocked = manager_with_relay(local_identity("janitor"), Arc::new(NullRelay));
    assert!(matches!(
        blocked.acquire(&path, LockKind::Write, Budget::TryOnce),
        Err(LockError::Busy(_))
    ));
    assert!(dir.path().join("data.lock").exists());

    // a relay that reports it dead lets the next acquire purge and win
    let scavenger = manager_with_relay(local_identity("janitor"), Arc::new(DeadRelay));
    assert_eq!(
        scavenger
            .acquire(&path, LockKind::Write, Budget::TryOnce)
            .unwrap(),
        LockOutcome::Held
    );
    let stale_marker = dir
        .path()
        .join(OwnerMarker::file_name_for("data", &remote));
    assert!(!stale_marker.exists());
}

#[test]
fn live_local_owner_is_not_purged() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);

    // marker naming this very process: the null-signal probe finds it alive
    let local = local_identity("livelock");
    fs::hard_link(&path, dir.path().join("data.lock")).unwrap();
    fs::hard_link(
        &path,
        dir.path().join(OwnerMarker::file_name_for("data", &local)),
    )
    .unwrap();

    let contender = manager(local_identity("contender"));
    assert!(matches!(
        contender.acquire(&path, LockKind::Write, Budget::TryOnce),
        Err(LockError::Busy(_))
    ));
    assert!(dir.path().join("data.lock").exists());
}

#[test]
fn orphaned_lock_without_marker_is_purged() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);

    // lock file with no owner marker: link count below the minimum
    fs::hard_link(&path, dir.path().join("data.lock")).unwrap();

    let manager = manager(local_identity("cleaner"));
    assert_eq!(
        manager
            .acquire(&path, LockKind::Write, Budget::TryOnce)
            .unwrap(),
        LockOutcome::Held
    );
}

#[test]
fn reentrant_acquire_counts_local_holders() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let manager = manager(local_identity("nested"));

    manager
        .acquire(&path, LockKind::Write, Budget::TryOnce)
        .unwrap();
    manager
        .acquire(&path, LockKind::Write, Budget::TryOnce)
        .unwrap();

    manager.release(&path).unwrap();
    // still held after the first release
    assert_eq!(manager.held_kind(&path), Some(LockKind::Write));
    assert!(dir.path().join("data.lock").exists());

    manager.release(&path).unwrap();
    assert!(manager.held_kind(&path).is_none());
    assert!(!dir.path().join("data.lock").exists());
}

#[test]
fn kind_mismatch_on_reentry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let manager = manager(local_identity("mixed"));

    manager
        .acquire(&path, LockKind::Read, Budget::TryOnce)
        .unwrap();
    assert!(matches!(
        manager.acquire(&path, LockKind::Write, Budget::TryOnce),
        Err(LockError::KindMismatch { .. })
    ));
}

#[test]
fn release_of_unheld_lock_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let manager = manager(local_identity("empty"));
    assert!(matches!(
        manager.release(&path),
        Err(LockError::NotHeld(_))
    ));
}

#[test]
fn missing_target_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(local_identity("lost"));
    assert!(matches!(
        manager.acquire(&dir.path().join("nonexistent"), LockKind::Read, Budget::TryOnce),
        Err(LockError::TargetMissing(_))
    ));
}

#[test]
fn release_all_purges_every_held_lock() {
    let dir = tempfile::tempdir().unwrap();
    let first = target(&dir);
    let second = dir.path().join("other");
    fs::write(&second, b"more state").unwrap();

    let manager = manager(local_identity("exiting"));
    manager
        .acquire(&first, LockKind::Write, Budget::TryOnce)
        .unwrap();
    manager
        .acquire(&second, LockKind::Read, Budget::TryOnce)
        .unwrap();
    assert_eq!(manager.snapshot().len(), 2);

    manager.release_all();
    assert!(manager.snapshot().is_empty());
    assert!(!dir.path().join("data.lock").exists());
    assert!(!dir.path().join("other.rdlock").exists());
}

#[test]
fn bounded_attempts_succeed_once_contention_clears() {
    let dir = tempfile::tempdir().unwrap();
    let path = target(&dir);
    let holder = manager(local_identity("holder"));
    holder
        .acquire(&path, LockKind::Write, Budget::TryOnce)
        .unwrap();

    let contender = manager(local_identity("patient"));
    let path_clone = path.clone();
    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        holder.release(&path_clone).unwrap();
    });

    let outcome = contender
        .acquire(&path, LockKind::Write, Budget::Attempts(200))
        .unwrap();
    assert_eq!(outcome, LockOutcome::Held);
    releaser.join().unwrap();
}
