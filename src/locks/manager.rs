/*!
 * Lock Manager
 * NFS-safe advisory locks built from atomic hard-link creation, with
 * stale-owner scavenging
 */

use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, info, warn};
use nix::libc;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::limits::{
    DEFAULT_LOCK_BACKOFF, MIN_LOCK_LINK_COUNT, READ_LOCK_SUFFIX, WRITE_LOCK_SUFFIX,
};
use crate::core::types::Identity;
use crate::core::{self, ErrorCode};
use crate::platform::FsOps;
use crate::sigledger::SignalLedger;

use super::marker::OwnerMarker;
use super::relay::{probe, SignalRelay};
use super::types::{Budget, LockError, LockKind, LockOutcome, LockRecord, LockResult};

/// Signals held across on-disk lock mutations so a shutdown cannot
/// interrupt a half-linked lock
const LOCK_SIGNALS: [Signal; 4] = [
    Signal::SIGALRM,
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGQUIT,
];

struct LockInner {
    held: DashMap<PathBuf, LockRecord, RandomState>,
    fs: Arc<dyn FsOps>,
    relay: Arc<dyn SignalRelay>,
    identity: Identity,
    ledger: Arc<SignalLedger>,
    backoff: Duration,
    /// Serializes multi-file protocol steps within this process
    protocol: Mutex<()>,
}

/// Outcome of one linking attempt
enum Take {
    Taken(LockRecord),
    Busy,
    ReadOnly,
}

/// Advisory lock manager; the on-disk hard links are the actual contract
/// with cooperating processes
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<LockInner>,
}

impl LockManager {
    pub fn new(
        identity: Identity,
        fs: Arc<dyn FsOps>,
        relay: Arc<dyn SignalRelay>,
        ledger: Arc<SignalLedger>,
    ) -> Self {
        Self {
            inner: Arc::new(LockInner {
                held: DashMap::with_hasher(RandomState::new()),
                fs,
                relay,
                identity,
                ledger,
                backoff: DEFAULT_LOCK_BACKOFF,
                protocol: Mutex::new(()),
            }),
        }
    }

    /// Override the contention backoff (primarily for tests)
    pub fn with_backoff(self, backoff: Duration) -> Self {
        // single-owner at construction time; rebuild the inner state
        let inner = &self.inner;
        Self {
            inner: Arc::new(LockInner {
                held: DashMap::with_hasher(RandomState::new()),
                fs: inner.fs.clone(),
                relay: inner.relay.clone(),
                identity: inner.identity.clone(),
                ledger: inner.ledger.clone(),
                backoff,
                protocol: Mutex::new(()),
            }),
        }
    }

    /// Acquire an advisory lock on `path` within the attempt budget
    pub fn acquire(&self, path: &Path, kind: LockKind, budget: Budget) -> LockResult<LockOutcome> {
        let Some(name) = file_name(path) else {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(LockError::InvalidPath);
        };
        let _hold = self.hold()?;
        let _proto = self.inner.protocol.lock();

        // nested local acquisition of a lock we already hold
        if let Some(mut record) = self.inner.held.get_mut(path) {
            if record.kind != kind {
                return Err(LockError::KindMismatch {
                    held: record.kind,
                    requested: kind,
                });
            }
            record.holders += 1;
            debug!(
                "lock {} re-entered locally ({} holders)",
                path.display(),
                record.holders
            );
            return Ok(LockOutcome::Held);
        }

        if !self.inner.fs.exists(path) {
            core::set_last_error(ErrorCode::NoSuchEntry);
            return Err(LockError::TargetMissing(path.to_path_buf()));
        }
        let dir = parent(path);
        if self.inner.fs.is_read_only(&dir).unwrap_or(false) {
            core::set_last_error(ErrorCode::ReadOnlyMedia);
            info!("{} on read-only media; lock protocol unavailable", path.display());
            return Ok(LockOutcome::ReadOnlyMedia);
        }

        let mut attempts = 0u32;
        loop {
            self.scavenge(path, &name)?;
            match self.try_take(path, &name, kind)? {
                Take::ReadOnly => {
                    core::set_last_error(ErrorCode::ReadOnlyMedia);
                    info!(
                        "{} on read-only media; lock protocol unavailable",
                        path.display()
                    );
                    return Ok(LockOutcome::ReadOnlyMedia);
                }
                Take::Taken(record) => {
                    info!(
                        "lock acquired: {} ({:?}) by {}.{}",
                        path.display(),
                        kind,
                        self.inner.identity.app,
                        self.inner.identity.pid
                    );
                    self.inner.held.insert(path.to_path_buf(), record);
                    return Ok(LockOutcome::Held);
                }
                Take::Busy => {
                    attempts += 1;
                    match budget {
                        Budget::TryOnce => {
                            core::set_last_error(ErrorCode::Busy);
                            return Err(LockError::Busy(path.to_path_buf()));
                        }
                        Budget::Attempts(max) if attempts >= max => {
                            core::set_last_error(ErrorCode::Busy);
                            return Err(LockError::Busy(path.to_path_buf()));
                        }
                        _ => std::thread::sleep(self.inner.backoff),
                    }
                }
            }
        }
    }

    /// Release one level of a held lock; the last local holder removes
    /// the marker and, if no holders remain anywhere, the lock file
    pub fn release(&self, path: &Path) -> LockResult<()> {
        let _hold = self.hold()?;
        let _proto = self.inner.protocol.lock();

        let record = {
            let Some(mut record) = self.inner.held.get_mut(path) else {
                core::set_last_error(ErrorCode::NoSuchEntry);
                return Err(LockError::NotHeld(path.to_path_buf()));
            };
            record.holders -= 1;
            if record.holders > 0 {
                debug!(
                    "lock {} released locally ({} holders remain)",
                    path.display(),
                    record.holders
                );
                return Ok(());
            }
            record.clone()
        };
        self.inner.held.remove(path);
        self.drop_on_disk(&record);
        info!("lock released: {}", path.display());
        Ok(())
    }

    /// Purge every lock the process still holds; used on process exit
    pub fn release_all(&self) {
        let _proto = self.inner.protocol.lock();
        let records: Vec<LockRecord> = self
            .inner
            .held
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.held.clear();
        for record in records {
            self.drop_on_disk(&record);
            info!("lock released at exit: {}", record.target.display());
        }
    }

    /// Kind of the lock held on `path`, if any
    pub fn held_kind(&self, path: &Path) -> Option<LockKind> {
        self.inner.held.get(path).map(|record| record.kind)
    }

    /// Locks currently held by this process
    pub fn snapshot(&self) -> Vec<LockRecord> {
        self.inner
            .held
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Protocol internals
    // ------------------------------------------------------------------

    /// Purge locks whose owners are dead or whose link count shows no
    /// marker remains. Both checks are advisory heuristics; on a real
    /// network filesystem they can race link-count propagation.
    fn scavenge(&self, target: &Path, name: &str) -> LockResult<()> {
        let dir = parent(target);
        let entries = self
            .inner
            .fs
            .read_dir_names(&dir)
            .map_err(|e| io_err(&dir, e))?;

        let mut live_markers = 0usize;
        for entry in &entries {
            let Some(marker) = OwnerMarker::parse(entry, name) else {
                continue;
            };
            if marker.belongs_to(&self.inner.identity)
                || probe(&self.inner.identity, self.inner.relay.as_ref(), &marker)
            {
                live_markers += 1;
                continue;
            }
            warn!(
                "stale lock owner {}@{} (pid {}) on {}; purging",
                marker.app,
                marker.host,
                marker.pid,
                target.display()
            );
            let _ = self.inner.fs.unlink(&dir.join(entry));
        }

        for suffix in [WRITE_LOCK_SUFFIX, READ_LOCK_SUFFIX] {
            let lock_path = dir.join(format!("{}{}", name, suffix));
            if !self.inner.fs.exists(&lock_path) {
                continue;
            }
            let under_linked = self
                .inner
                .fs
                .nlink(&lock_path)
                .map(|n| n < MIN_LOCK_LINK_COUNT)
                .unwrap_or(false);
            if live_markers == 0 || under_linked {
                warn!("orphaned lock file {}; purging", lock_path.display());
                let _ = self.inner.fs.unlink(&lock_path);
            }
        }
        Ok(())
    }

    /// One linking attempt
    fn try_take(&self, target: &Path, name: &str, kind: LockKind) -> LockResult<Take> {
        let dir = parent(target);
        let write_lock = dir.join(format!("{}{}", name, WRITE_LOCK_SUFFIX));
        let read_lock = dir.join(format!("{}{}", name, READ_LOCK_SUFFIX));

        let (lock_path, excluded_by) = match kind {
            LockKind::Write => (write_lock.clone(), read_lock.clone()),
            LockKind::Read => (read_lock.clone(), write_lock.clone()),
        };
        if self.inner.fs.exists(&excluded_by) {
            return Ok(Take::Busy);
        }

        let created = match self.inner.fs.hard_link(target, &lock_path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if kind == LockKind::Write {
                    // another writer got there first
                    return Ok(Take::Busy);
                }
                // readers share one rdlock file
                false
            }
            Err(e) if e.raw_os_error() == Some(libc::EROFS) => return Ok(Take::ReadOnly),
            Err(e) => return Err(io_err(&lock_path, e)),
        };

        let marker_path = dir.join(OwnerMarker::file_name_for(name, &self.inner.identity));
        match self.inner.fs.hard_link(target, &marker_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // leftover marker from an earlier life of this pid
                debug!("reusing existing marker {}", marker_path.display());
            }
            Err(e) => {
                if created {
                    let _ = self.inner.fs.unlink(&lock_path);
                }
                return Err(io_err(&marker_path, e));
            }
        }

        Ok(Take::Taken(LockRecord {
            target: target.to_path_buf(),
            kind,
            holders: 1,
            lock_path,
            marker_path,
        }))
    }

    /// Remove this process's marker, and the lock file itself when no
    /// markers from anyone remain
    fn drop_on_disk(&self, record: &LockRecord) {
        if let Err(e) = self.inner.fs.unlink(&record.marker_path) {
            debug!(
                "marker {} already gone: {}",
                record.marker_path.display(),
                e
            );
        }
        let dir = parent(&record.target);
        let name = match file_name(&record.target) {
            Some(name) => name,
            None => return,
        };
        let others = self
            .inner
            .fs
            .read_dir_names(&dir)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| OwnerMarker::parse(entry, &name).is_some())
                    .count()
            })
            .unwrap_or(0);
        if others == 0 {
            if let Err(e) = self.inner.fs.unlink(&record.lock_path) {
                debug!(
                    "lock file {} already gone: {}",
                    record.lock_path.display(),
                    e
                );
            }
        }
    }

    fn hold(&self) -> LockResult<crate::sigledger::HoldGuard<'_>> {
        self.inner
            .ledger
            .guard(&LOCK_SIGNALS)
            .map_err(|e| LockError::Ledger(e.to_string()))
    }
}

fn parent(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf()
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}

fn io_err(path: &Path, source: std::io::Error) -> LockError {
    core::set_last_error(ErrorCode::Io);
    LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}
