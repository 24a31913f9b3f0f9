/*!
 * Signal Ledger Module
 * Nested signal masking with correct pending-signal semantics
 */

mod ledger;
pub mod types;

pub use ledger::{HoldGuard, SignalLedger};
pub use types::{holdable, SignalError, SignalResult, SAFE_SET};
