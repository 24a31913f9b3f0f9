/*!
 * Core Module
 * Shared types, limits, and the error taxonomy
 */

pub mod errors;
pub mod limits;
pub mod types;

pub use errors::{
    clear_last_error, fatal, last_error, set_fatal_cleanup, set_last_error, ErrorCode,
};
pub use types::{AccessMode, Identity, Pid, Priority, SlotId, Ticks};
