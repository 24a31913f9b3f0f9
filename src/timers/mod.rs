/*!
 * Timers Module
 * Software-multiplexed interval timers built on a single OS quantum
 */

mod driver;
mod mux;
pub mod types;

pub use driver::QuantumDriver;
pub use mux::{ArmControl, TimerMultiplexer};
pub use types::{TimerError, TimerInfo, TimerMode, TimerPayload, TimerResult};
