/*!
 * Runtime Configuration
 * Capacities, intervals, and identity supplied by the bootstrap layer
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core::limits::{
    DEFAULT_LOCK_BACKOFF, DEFAULT_POLL_TICKS, DEFAULT_QUANTUM, DEFAULT_RESOURCE_CAPACITY,
    DEFAULT_TIMER_CAPACITY, RESERVED_STDIO_SLOTS,
};

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Application name must not be empty")]
    EmptyAppName,

    #[error("Quantum must be nonzero")]
    ZeroQuantum,

    #[error("Poll interval must be at least one tick")]
    ZeroPollTicks,

    #[error("Resource capacity {0} leaves no room beyond the reserved stdio slots")]
    ResourceCapacityTooSmall(usize),

    #[error("Timer capacity must be nonzero")]
    ZeroTimerCapacity,
}

/// Tunables of the resilience substrate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Application name embedded in on-disk owner markers
    pub app_name: String,
    /// Virtual timer table capacity
    pub timer_capacity: usize,
    /// Resource slot table capacity (including the 3 reserved slots)
    pub resource_capacity: usize,
    /// Quantum of the periodic interrupt, in milliseconds
    pub quantum_ms: u64,
    /// Homeostat poll interval, in quantum ticks
    pub poll_ticks: u32,
    /// Backoff between lock acquisition attempts, in milliseconds
    pub lock_backoff_ms: u64,
    /// Signal-relay port advertised in owner markers, if any
    pub relay_port: Option<u16>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app_name: "vigil".to_string(),
            timer_capacity: DEFAULT_TIMER_CAPACITY,
            resource_capacity: DEFAULT_RESOURCE_CAPACITY,
            quantum_ms: DEFAULT_QUANTUM.as_millis() as u64,
            poll_ticks: DEFAULT_POLL_TICKS,
            lock_backoff_ms: DEFAULT_LOCK_BACKOFF.as_millis() as u64,
            relay_port: None,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.is_empty() {
            return Err(ConfigError::EmptyAppName);
        }
        if self.quantum_ms == 0 {
            return Err(ConfigError::ZeroQuantum);
        }
        if self.poll_ticks == 0 {
            return Err(ConfigError::ZeroPollTicks);
        }
        if self.timer_capacity == 0 {
            return Err(ConfigError::ZeroTimerCapacity);
        }
        if self.resource_capacity <= RESERVED_STDIO_SLOTS {
            return Err(ConfigError::ResourceCapacityTooSmall(self.resource_capacity));
        }
        Ok(())
    }

    pub fn quantum(&self) -> Duration {
        Duration::from_millis(self.quantum_ms)
    }

    pub fn lock_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_backoff_ms)
    }
}
