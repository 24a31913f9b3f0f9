/*!
 * Error Taxonomy
 * Typed per-module errors, the process-wide last-error cell, and the
 * fatal path for protocol violations
 */

use log::error;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};

// Re-export module error types so callers can match on one import
pub use crate::locks::types::LockError;
pub use crate::resources::types::ResourceError;
pub use crate::sigledger::types::SignalError;
pub use crate::timers::types::TimerError;

/// Coarse error classification recorded process-wide
///
/// Invalid arguments are checked first in every public operation and
/// recorded here rather than propagated; operational failures are
/// recorded and also returned as typed errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    None = 0,
    InvalidArgument = 1,
    TableFull = 2,
    DuplicateName = 3,
    NoSuchEntry = 4,
    Busy = 5,
    ReadOnlyMedia = 6,
    Io = 7,
}

impl ErrorCode {
    fn from_raw(raw: i32) -> Self {
        match raw {
            1 => ErrorCode::InvalidArgument,
            2 => ErrorCode::TableFull,
            3 => ErrorCode::DuplicateName,
            4 => ErrorCode::NoSuchEntry,
            5 => ErrorCode::Busy,
            6 => ErrorCode::ReadOnlyMedia,
            7 => ErrorCode::Io,
            _ => ErrorCode::None,
        }
    }
}

static LAST_ERROR: AtomicI32 = AtomicI32::new(0);

/// Record the most recent error classification
pub fn set_last_error(code: ErrorCode) {
    LAST_ERROR.store(code as i32, Ordering::Relaxed);
}

/// Most recent error classification, `ErrorCode::None` if clear
pub fn last_error() -> ErrorCode {
    ErrorCode::from_raw(LAST_ERROR.load(Ordering::Relaxed))
}

/// Clear the last-error cell
pub fn clear_last_error() {
    LAST_ERROR.store(0, Ordering::Relaxed);
}

type CleanupHook = Box<dyn Fn() + Send + Sync>;

static CLEANUP: RwLock<Option<CleanupHook>> = RwLock::new(None);

/// Install the best-effort cleanup hook run on the fatal path
/// (the runtime points this at timer disarm + lock release + shadow removal)
pub fn set_fatal_cleanup(hook: impl Fn() + Send + Sync + 'static) {
    *CLEANUP.write() = Some(Box::new(hook));
}

/// Fatal path for protocol violations (hold/release underflow and kin).
///
/// Continuing would operate on a corrupted invariant, so after a
/// diagnostic and best-effort cleanup the process does not continue.
pub fn fatal(component: &str, msg: &str) -> ! {
    error!("FATAL [{}]: {}", component, msg);
    if let Some(hook) = CLEANUP.read().as_ref() {
        hook();
    }
    panic!("fatal protocol violation in {}: {}", component, msg);
}
