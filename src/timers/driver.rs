/*!
 * Quantum Driver
 * Background thread standing in for the OS periodic interrupt: while
 * armed it delivers one dispatch per quantum, otherwise it parks
 */

use log::info;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::mux::{ArmControl, TimerMultiplexer};

#[derive(Debug, Default)]
struct DriverState {
    armed: bool,
    shutdown: bool,
}

struct DriverInner {
    quantum: Duration,
    state: Mutex<DriverState>,
    wake: Condvar,
}

/// Owns the interrupt thread; armed/disarmed by the multiplexer as
/// timers come and go
pub struct QuantumDriver {
    inner: Arc<DriverInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl QuantumDriver {
    /// Spawn the driver and register it as the multiplexer's interrupt
    /// source
    pub fn spawn(mux: &TimerMultiplexer, quantum: Duration) -> Arc<Self> {
        let inner = Arc::new(DriverInner {
            quantum,
            state: Mutex::new(DriverState::default()),
            wake: Condvar::new(),
        });

        let thread_inner = inner.clone();
        let thread_mux = mux.clone();
        let handle = std::thread::Builder::new()
            .name("vigil-quantum".to_string())
            .spawn(move || Self::run(thread_inner, thread_mux))
            .expect("failed to spawn quantum driver thread");

        let driver = Arc::new(Self {
            inner,
            thread: Mutex::new(Some(handle)),
        });
        mux.attach_arm_control(driver.clone());
        info!("quantum driver running ({:?} quantum)", quantum);
        driver
    }

    fn run(inner: Arc<DriverInner>, mux: TimerMultiplexer) {
        loop {
            {
                let mut state = inner.state.lock();
                while !state.armed && !state.shutdown {
                    inner.wake.wait(&mut state);
                }
                if state.shutdown {
                    return;
                }
            }
            std::thread::sleep(inner.quantum);
            let state = inner.state.lock();
            if state.shutdown {
                return;
            }
            let deliver = state.armed;
            drop(state);
            if deliver {
                mux.dispatch();
            }
        }
    }

    /// Stop the interrupt thread; idempotent
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
        }
        self.wake();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        info!("quantum driver stopped");
    }

    fn wake(&self) {
        self.inner.wake.notify_all();
    }
}

impl ArmControl for QuantumDriver {
    fn arm(&self) {
        self.inner.state.lock().armed = true;
        self.wake();
    }

    fn disarm(&self) {
        self.inner.state.lock().armed = false;
    }
}

impl Drop for QuantumDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
