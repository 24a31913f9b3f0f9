/*!
 * Runtime Facade
 * Wires the signal ledger, timer multiplexer, resource table, and lock
 * manager together, and owns orderly shutdown
 */

mod config;

pub use config::{ConfigError, RuntimeConfig};

use nix::libc;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::core::types::Identity;
use crate::core::{self};
use crate::locks::{LockManager, NullRelay, SignalRelay};
use crate::platform::{FsOps, MaskBackend, PosixFs, PosixMask};
use crate::resources::{self, ResourceTable};
use crate::sigledger::SignalLedger;
use crate::timers::{QuantumDriver, TimerMultiplexer};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Release);
}

/// Whether a termination/interrupt/quit signal has been received; the
/// host loop polls this and calls [`Runtime::shutdown`]
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::Acquire)
}

/// The assembled resilience substrate
pub struct Runtime {
    ledger: Arc<SignalLedger>,
    timers: TimerMultiplexer,
    driver: Option<Arc<QuantumDriver>>,
    resources: ResourceTable,
    locks: LockManager,
    config: RuntimeConfig,
    stopped: AtomicBool,
}

impl Runtime {
    /// Build with the POSIX backends and no remote relay
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        Self::with_backends(
            config,
            Arc::new(PosixMask::new()),
            Arc::new(PosixFs::new()),
            Arc::new(NullRelay),
        )
    }

    /// Build with explicit backends (alternative platforms, tests,
    /// injected signal relay)
    pub fn with_backends(
        config: RuntimeConfig,
        mask: Arc<dyn MaskBackend>,
        fs: Arc<dyn FsOps>,
        relay: Arc<dyn SignalRelay>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let ledger = Arc::new(SignalLedger::new(mask));
        let timers = TimerMultiplexer::new(config.timer_capacity, ledger.clone());
        let resources = ResourceTable::new(
            config.resource_capacity,
            timers.clone(),
            ledger.clone(),
            fs.clone(),
            config.poll_ticks,
            config.quantum(),
        );
        let mut identity = Identity::local(config.app_name.clone());
        if let Some(port) = config.relay_port {
            identity = identity.with_port(port);
        }
        let locks = LockManager::new(identity, fs, relay, ledger.clone())
            .with_backoff(config.lock_backoff());

        info!(
            app = %config.app_name,
            quantum_ms = config.quantum_ms,
            timer_capacity = config.timer_capacity,
            resource_capacity = config.resource_capacity,
            "runtime assembled"
        );
        Ok(Self {
            ledger,
            timers,
            driver: None,
            resources,
            locks,
            config,
            stopped: AtomicBool::new(false),
        })
    }

    /// Arm the quantum driver and install the process-wide signal
    /// handlers: orderly shutdown on TERM/INT/QUIT, best-effort shadow
    /// cleanup on fatal faults
    pub fn start(&mut self) {
        if self.driver.is_none() {
            self.driver = Some(QuantumDriver::spawn(&self.timers, self.config.quantum()));
        }
        install_shutdown_handlers();
        resources::install_fault_handler();

        let locks = self.locks.clone();
        let resources = self.resources.clone();
        core::set_fatal_cleanup(move || {
            locks.release_all();
            resources.release_all();
            resources::cleanup_shadows();
        });
        info!("runtime started");
    }

    /// Orderly shutdown: disarm all timers, release all locks, tear
    /// down all protected resources. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("runtime shutting down");
        if let Some(driver) = &self.driver {
            driver.stop();
        }
        self.locks.release_all();
        self.resources.release_all();
        info!("runtime shut down");
    }

    pub fn ledger(&self) -> &Arc<SignalLedger> {
        &self.ledger
    }

    pub fn timers(&self) -> &TimerMultiplexer {
        &self.timers
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn install_shutdown_handlers() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction =
            on_shutdown_signal as extern "C" fn(libc::c_int) as *const () as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in [libc::SIGTERM, libc::SIGINT, libc::SIGQUIT] {
            libc::sigaction(sig, &action, ptr::null_mut());
        }
    }
}

/// Initialize tracing output for hosts that have no subscriber of their
/// own; respects RUST_LOG-style filtering
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
