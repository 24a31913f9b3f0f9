/*!
 * Shared Test Doubles
 * Recording mask backend so ledger behavior is observable without
 * touching the real process mask
 */

use nix::sys::signal::Signal;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use vigil::sigledger::SignalLedger;
use vigil::MaskBackend;

/// Mask backend that records every transition instead of calling the OS
#[derive(Default)]
pub struct RecordingMask {
    pub blocked: Mutex<HashSet<i32>>,
    pub block_calls: Mutex<Vec<Vec<i32>>>,
    pub unblock_calls: Mutex<Vec<Vec<i32>>>,
    pub pending: Mutex<HashSet<i32>>,
    pub waited: Mutex<Vec<i32>>,
}

impl RecordingMask {
    pub fn is_blocked(&self, signal: Signal) -> bool {
        self.blocked.lock().contains(&(signal as i32))
    }

    pub fn set_pending(&self, signal: Signal) {
        self.pending.lock().insert(signal as i32);
    }

    pub fn is_pending(&self, signal: Signal) -> bool {
        self.pending.lock().contains(&(signal as i32))
    }
}

impl MaskBackend for RecordingMask {
    fn block(&self, signals: &[Signal]) -> io::Result<()> {
        let mut blocked = self.blocked.lock();
        for sig in signals {
            blocked.insert(*sig as i32);
        }
        self.block_calls
            .lock()
            .push(signals.iter().map(|s| *s as i32).collect());
        Ok(())
    }

    fn unblock(&self, signals: &[Signal]) -> io::Result<()> {
        let mut blocked = self.blocked.lock();
        for sig in signals {
            blocked.remove(&(*sig as i32));
        }
        self.unblock_calls
            .lock()
            .push(signals.iter().map(|s| *s as i32).collect());
        Ok(())
    }

    fn is_pending(&self, signal: Signal) -> bool {
        self.pending.lock().contains(&(signal as i32))
    }

    fn wait_for(&self, signal: Signal, _safe: &[Signal]) -> io::Result<()> {
        // the pending instance is "delivered" by the fake OS
        self.pending.lock().remove(&(signal as i32));
        self.waited.lock().push(signal as i32);
        Ok(())
    }
}

/// Ledger backed by a fresh recording mask
pub fn recording_ledger() -> (Arc<SignalLedger>, Arc<RecordingMask>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mask = Arc::new(RecordingMask::default());
    let ledger = Arc::new(SignalLedger::new(mask.clone()));
    (ledger, mask)
}
