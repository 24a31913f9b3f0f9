/*!
 * Signal Ledger Types
 * Error types and the safe set left open during pending-signal flushes
 */

use nix::sys::signal::Signal;
use thiserror::Error;

/// Signal ledger operation result
pub type SignalResult<T> = Result<T, SignalError>;

/// Signal ledger errors
///
/// Hold/release count underflow is deliberately absent: that is a
/// protocol violation and takes the fatal path instead of returning.
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Empty signal set")]
    EmptySet,

    #[error("Signal {0} cannot be held")]
    Unholdable(Signal),

    #[error("Mask backend failure: {0}")]
    Backend(#[from] std::io::Error),
}

/// Signals left deliverable while a non-deferred hold flushes a pending
/// instance: the quantum interrupt, termination, abort, and continue.
pub const SAFE_SET: [Signal; 4] = [
    Signal::SIGALRM,
    Signal::SIGTERM,
    Signal::SIGABRT,
    Signal::SIGCONT,
];

/// Signals the OS refuses to mask; holding them is an invalid argument
pub fn holdable(signal: Signal) -> bool {
    !matches!(signal, Signal::SIGKILL | Signal::SIGSTOP)
}
