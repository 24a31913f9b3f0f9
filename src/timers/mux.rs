/*!
 * Timer Multiplexer
 * Fans the single OS quantum out to many named, prioritized logical
 * timers, dispatched in descending-priority order
 */

use log::{debug, info, trace};
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::types::{Priority, SlotId, Ticks};
use crate::core::{self, ErrorCode};
use crate::sigledger::SignalLedger;

use super::types::{TimerError, TimerInfo, TimerMode, TimerPayload, TimerResult, TimerSlot};

/// Arms and disarms the underlying OS interrupt source
///
/// The quantum driver registers itself here; with no driver attached,
/// quanta are delivered by calling `dispatch` directly.
pub trait ArmControl: Send + Sync {
    fn arm(&self);
    fn disarm(&self);
}

struct MuxInner {
    slots: Mutex<Vec<Option<TimerSlot>>>,
    dispatching: AtomicBool,
    active: AtomicUsize,
    ledger: Arc<SignalLedger>,
    arm_control: Mutex<Option<Arc<dyn ArmControl>>>,
}

/// Virtual timer table driven by a single periodic quantum
#[derive(Clone)]
pub struct TimerMultiplexer {
    inner: Arc<MuxInner>,
}

impl TimerMultiplexer {
    pub fn new(capacity: usize, ledger: Arc<SignalLedger>) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            inner: Arc::new(MuxInner {
                slots: Mutex::new(slots),
                dispatching: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                ledger,
                arm_control: Mutex::new(None),
            }),
        }
    }

    /// Register the interrupt source; armed immediately if timers exist
    pub fn attach_arm_control(&self, control: Arc<dyn ArmControl>) {
        if self.inner.active.load(Ordering::Acquire) > 0 {
            control.arm();
        }
        *self.inner.arm_control.lock() = Some(control);
    }

    /// Register a logical timer. The table is re-sorted by descending
    /// priority; the returned slot index is valid until the next create
    /// or cancel.
    pub fn create(
        &self,
        name: &str,
        priority: Priority,
        mode: TimerMode,
        interval: Ticks,
        payload: TimerPayload,
    ) -> TimerResult<SlotId> {
        if name.is_empty() {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(TimerError::EmptyName);
        }
        if interval == 0 {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(TimerError::InvalidInterval);
        }

        let _hold = self
            .inner
            .ledger
            .guard(&[Signal::SIGALRM])
            .map_err(|e| TimerError::Ledger(e.to_string()))?;
        let mut slots = self.inner.slots.lock();

        if slots
            .iter()
            .flatten()
            .any(|slot| slot.name == name)
        {
            core::set_last_error(ErrorCode::DuplicateName);
            return Err(TimerError::DuplicateName(name.to_string()));
        }
        let free = match slots.iter().position(|slot| slot.is_none()) {
            Some(idx) => idx,
            None => {
                core::set_last_error(ErrorCode::TableFull);
                return Err(TimerError::TableFull);
            }
        };

        slots[free] = Some(TimerSlot {
            name: name.to_string(),
            priority,
            mode,
            interval,
            prescaler: interval,
            payload,
        });
        Self::resort(&mut slots);
        let id = slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.name == name))
            .unwrap_or(free);

        let prev = self.inner.active.fetch_add(1, Ordering::AcqRel);
        info!(
            "timer armed: {} (priority {}, {:?}, interval {} ticks)",
            name, priority, mode, interval
        );
        if prev == 0 {
            self.set_armed(true);
        }
        Ok(id)
    }

    /// Remove a timer by name; disarms the interrupt when none remain
    pub fn cancel(&self, name: &str) -> TimerResult<()> {
        if name.is_empty() {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(TimerError::EmptyName);
        }
        let _hold = self
            .inner
            .ledger
            .guard(&[Signal::SIGALRM])
            .map_err(|e| TimerError::Ledger(e.to_string()))?;
        let mut slots = self.inner.slots.lock();
        let idx = slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.name == name));
        let Some(idx) = idx else {
            core::set_last_error(ErrorCode::NoSuchEntry);
            return Err(TimerError::NoSuchTimer(name.to_string()));
        };
        slots[idx] = None;
        Self::resort(&mut slots);
        info!("timer disarmed: {}", name);
        if self.inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.set_armed(false);
        }
        Ok(())
    }

    /// Deliver one quantum: decrement every armed prescaler and run due
    /// payloads synchronously, highest priority first. A quantum arriving
    /// while dispatch is still running is dropped, not nested.
    pub fn dispatch(&self) {
        if self.inner.dispatching.swap(true, Ordering::AcqRel) {
            trace!("nested quantum dropped");
            return;
        }
        self.inner.ledger.enter_handler_context();

        let mut due: Vec<(String, TimerPayload)> = Vec::new();
        let mut expired = 0usize;
        {
            let mut slots = self.inner.slots.lock();
            for entry in slots.iter_mut() {
                let Some(slot) = entry else { continue };
                slot.prescaler -= 1;
                if slot.prescaler > 0 {
                    continue;
                }
                match slot.mode {
                    TimerMode::Continuous => {
                        slot.prescaler = slot.interval;
                        due.push((slot.name.clone(), slot.payload.clone()));
                    }
                    TimerMode::Oneshot => {
                        // slot released before the payload runs, so it is
                        // immediately reusable
                        let slot = entry.take().unwrap();
                        expired += 1;
                        due.push((slot.name, slot.payload));
                    }
                }
            }
            if expired > 0 {
                Self::resort(&mut slots);
            }
        }
        if expired > 0 && self.inner.active.fetch_sub(expired, Ordering::AcqRel) == expired {
            self.set_armed(false);
        }

        for (name, payload) in due {
            trace!("timer fires: {}", name);
            payload();
        }

        self.inner.ledger.exit_handler_context();
        self.inner.dispatching.store(false, Ordering::Release);
    }

    /// Number of registered timers
    pub fn len(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered slot in dispatch order
    pub fn snapshot(&self) -> Vec<TimerInfo> {
        self.inner
            .slots
            .lock()
            .iter()
            .flatten()
            .map(TimerInfo::from)
            .collect()
    }

    /// Snapshot of one timer by name
    pub fn info(&self, name: &str) -> Option<TimerInfo> {
        self.inner
            .slots
            .lock()
            .iter()
            .flatten()
            .find(|slot| slot.name == name)
            .map(TimerInfo::from)
    }

    /// Occupied slots first, descending priority; stable so equal
    /// priorities keep creation order
    fn resort(slots: &mut [Option<TimerSlot>]) {
        slots.sort_by_key(|slot| match slot {
            Some(s) => (0u8, Reverse(s.priority)),
            None => (1u8, Reverse(0u32)),
        });
    }

    fn set_armed(&self, armed: bool) {
        if let Some(control) = self.inner.arm_control.lock().as_ref() {
            debug!("quantum source {}", if armed { "armed" } else { "disarmed" });
            if armed {
                control.arm();
            } else {
                control.disarm();
            }
        }
    }
}
