/*!
 * Vigil
 * Resilience and scheduling substrate for long-lived processes: nested
 * signal masking, a software-multiplexed interval-timer scheduler,
 * homeostatic (self-repairing) resource tracking, and NFS-safe
 * hard-link advisory locks
 */

pub mod core;
pub mod locks;
pub mod platform;
pub mod resources;
pub mod runtime;
pub mod sigledger;
pub mod timers;

// Re-exports
pub use core::{AccessMode, ErrorCode, Identity};
pub use locks::{Budget, LockKind, LockManager, LockOutcome, NullRelay, OwnerMarker, SignalRelay};
pub use platform::{FsOps, MaskBackend, PosixFs, PosixMask};
pub use resources::{Homeostat, Hooks, ResourceTable, SpacePolicy};
pub use runtime::{Runtime, RuntimeConfig};
pub use sigledger::{HoldGuard, SignalLedger};
pub use timers::{QuantumDriver, TimerMode, TimerMultiplexer};
