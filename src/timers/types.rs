/*!
 * Timer Types
 * Slot, mode, and error definitions for the virtual timer table
 */

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::core::types::{Priority, Ticks};

/// Timer operation result
pub type TimerResult<T> = Result<T, TimerError>;

/// Timer errors
#[derive(Error, Debug)]
pub enum TimerError {
    #[error("Timer name already registered: {0}")]
    DuplicateName(String),

    #[error("Timer table full")]
    TableFull,

    #[error("Timer interval must be at least one quantum")]
    InvalidInterval,

    #[error("Timer name must not be empty")]
    EmptyName,

    #[error("No such timer: {0}")]
    NoSuchTimer(String),

    #[error("Signal ledger failure: {0}")]
    Ledger(String),
}

/// Firing mode of a logical timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerMode {
    /// Fires once, slot released immediately after
    Oneshot,
    /// Reloads its prescaler from the interval and stays armed
    Continuous,
}

/// Payload invoked synchronously from dispatch context
pub type TimerPayload = Arc<dyn Fn() + Send + Sync>;

/// One entry of the virtual timer table
pub(crate) struct TimerSlot {
    pub name: String,
    pub priority: Priority,
    pub mode: TimerMode,
    pub interval: Ticks,
    pub prescaler: Ticks,
    pub payload: TimerPayload,
}

/// Read-only snapshot of a slot, for introspection and logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerInfo {
    pub name: String,
    pub priority: Priority,
    pub mode: TimerMode,
    pub interval: Ticks,
    pub prescaler: Ticks,
}

impl From<&TimerSlot> for TimerInfo {
    fn from(slot: &TimerSlot) -> Self {
        Self {
            name: slot.name.clone(),
            priority: slot.priority,
            mode: slot.mode,
            interval: slot.interval,
            prescaler: slot.prescaler,
        }
    }
}
