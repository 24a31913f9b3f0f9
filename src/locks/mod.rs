/*!
 * Locks Module
 * Hard-link advisory locking safe over network filesystems
 */

mod manager;
mod marker;
mod relay;
pub mod types;

pub use manager::LockManager;
pub use marker::OwnerMarker;
pub use relay::{NullRelay, SignalRelay};
pub use types::{Budget, LockError, LockKind, LockOutcome, LockRecord, LockResult};
