/*!
 * Lock Types
 * Kinds, attempt budgets, outcomes, and errors of the link-lock protocol
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Lock operation result
pub type LockResult<T> = Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock busy: {0}")]
    Busy(PathBuf),

    #[error("Lock target does not exist: {0}")]
    TargetMissing(PathBuf),

    #[error("Invalid lock path")]
    InvalidPath,

    #[error("Held as {held:?}; cannot re-acquire as {requested:?}")]
    KindMismatch { held: LockKind, requested: LockKind },

    #[error("Not holding a lock on {0}")]
    NotHeld(PathBuf),

    #[error("Signal ledger failure: {0}")]
    Ledger(String),

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reader/writer kind of an advisory lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    /// Any number of readers may coexist
    Read,
    /// A writer excludes readers and other writers
    Write,
}

/// How long `acquire` may keep trying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Budget {
    /// One attempt, fail immediately on contention
    TryOnce,
    /// Bounded number of attempts with backoff between them
    Attempts(u32),
    /// Retry until the lock is obtained or the process dies
    Forever,
}

/// Successful acquisition outcome
///
/// Read-only media cannot carry the link protocol; that is reported as
/// a distinguished outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockOutcome {
    Held,
    ReadOnlyMedia,
}

/// A lock this process currently holds
#[derive(Debug, Clone)]
pub struct LockRecord {
    pub target: PathBuf,
    pub kind: LockKind,
    /// Nested local acquisitions
    pub holders: u32,
    pub lock_path: PathBuf,
    pub marker_path: PathBuf,
}
