/*!
 * Resource Table
 * Fixed-capacity slot arena tracking every descriptor the process owns,
 * with timer-driven homeostatic protection
 */

use log::{debug, info, warn};
use nix::libc;
use nix::sys::signal::Signal;
use parking_lot::{Mutex, RwLock};
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::core::limits::{RESERVED_STDIO_SLOTS, TTY_DEVICE};
use crate::core::types::{AccessMode, SlotId, Ticks};
use crate::core::{self, ErrorCode};
use crate::platform::FsOps;
use crate::sigledger::SignalLedger;
use crate::timers::{TimerMode, TimerMultiplexer};

use super::faults;
use super::homeostat::{self, TtyState};
use super::types::{
    shadow_path_for, Homeostat, Hooks, ResourceError, ResourceInfo, ResourceResult, ResourceSlot,
};

/// Signals held around every mutating table operation; the homeostat
/// runs from quantum-dispatch context against the same slots
const TABLE_SIGNALS: [Signal; 1] = [Signal::SIGALRM];

pub(crate) struct TableInner {
    pub slots: Mutex<Vec<Option<ResourceSlot>>>,
    pub mux: TimerMultiplexer,
    pub ledger: Arc<SignalLedger>,
    pub fs: Arc<dyn FsOps>,
    pub poll_ticks: Ticks,
    pub poll_duration: Duration,
    pub hooks: RwLock<Hooks>,
    pub tty: TtyState,
}

/// Homeostatic resource table. Slots 0–2 are permanently reserved for
/// the standard streams and are only ever toggled alive/dead.
#[derive(Clone)]
pub struct ResourceTable {
    inner: Arc<TableInner>,
}

impl ResourceTable {
    pub fn new(
        capacity: usize,
        mux: TimerMultiplexer,
        ledger: Arc<SignalLedger>,
        fs: Arc<dyn FsOps>,
        poll_ticks: Ticks,
        quantum: Duration,
    ) -> Self {
        let capacity = capacity.max(RESERVED_STDIO_SLOTS + 1);
        let mut slots: Vec<Option<ResourceSlot>> = Vec::with_capacity(capacity);
        for fd in 0..RESERVED_STDIO_SLOTS as i32 {
            let terminal = unsafe { libc::isatty(fd) } == 1;
            slots.push(Some(ResourceSlot {
                fd,
                file: None,
                primary: if terminal {
                    PathBuf::from(TTY_DEVICE)
                } else {
                    PathBuf::from(format!("/dev/fd/{}", fd))
                },
                shadow: None,
                protection: 0,
                lost_count: 0,
                creator: false,
                named: false,
                alive: true,
                terminal,
                mode: if fd == 0 {
                    AccessMode::Read
                } else {
                    AccessMode::Write
                },
                mode_bits: 0,
                homeostat_name: None,
                homeostat: Homeostat::Default,
            }));
        }
        slots.resize_with(capacity, || None);
        info!(
            "resource table initialized ({} slots, {} reserved)",
            capacity, RESERVED_STDIO_SLOTS
        );
        Self {
            inner: Arc::new(TableInner {
                slots: Mutex::new(slots),
                mux,
                ledger,
                fs,
                poll_ticks: poll_ticks.max(1),
                poll_duration: quantum * poll_ticks.max(1),
                hooks: RwLock::new(Hooks::default()),
                tty: TtyState::default(),
            }),
        }
    }

    /// Replace the late-bound homeostat behaviors
    pub fn set_hooks(&self, hooks: Hooks) {
        *self.inner.hooks.write() = hooks;
    }

    /// Open `path` and record it in a free slot
    pub fn acquire(&self, path: &Path, mode: AccessMode) -> ResourceResult<SlotId> {
        if path.as_os_str().is_empty() {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(ResourceError::InvalidPath);
        }
        let _hold = self.hold()?;

        let creator = !self.inner.fs.exists(path);
        let mut options = OpenOptions::new();
        match mode {
            AccessMode::Read => options.read(true),
            AccessMode::Write => options.write(true).create(true),
            AccessMode::ReadWrite => options.read(true).write(true).create(true),
        };
        let file = options.open(path).map_err(|e| io_err(path, e))?;
        let fd = file.as_raw_fd();
        let mode_bits = self.inner.fs.mode_bits(path).unwrap_or(0o644);
        let terminal = unsafe { libc::isatty(fd) } == 1;

        let mut slots = self.inner.slots.lock();
        let free = slots
            .iter()
            .enumerate()
            .skip(RESERVED_STDIO_SLOTS)
            .find(|(_, slot)| slot.is_none())
            .map(|(idx, _)| idx);
        let Some(idx) = free else {
            core::set_last_error(ErrorCode::TableFull);
            return Err(ResourceError::TableFull);
        };
        slots[idx] = Some(ResourceSlot {
            fd,
            file: Some(file),
            primary: path.to_path_buf(),
            shadow: None,
            protection: 0,
            lost_count: 0,
            creator,
            named: true,
            alive: true,
            terminal,
            mode,
            mode_bits,
            homeostat_name: None,
            homeostat: Homeostat::Default,
        });
        info!("resource acquired: {} (slot {})", path.display(), idx);
        Ok(idx)
    }

    /// Protect a slot: create its shadow and arm a continuous homeostat
    /// timer. Nested calls only raise the protection refcount.
    pub fn make_alive(
        &self,
        id: SlotId,
        handler_name: &str,
        homeostat: Homeostat,
    ) -> ResourceResult<()> {
        if handler_name.is_empty() {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(ResourceError::InvalidPath);
        }
        let _hold = self.hold()?;
        let mut slots = self.inner.slots.lock();
        let slot = occupied(&mut slots, id)?;
        if !slot.alive {
            // reserved stream slots are toggled, never destroyed; dead is
            // a reversible state for them
            if id < RESERVED_STDIO_SLOTS {
                slot.alive = true;
            } else {
                return Err(ResourceError::Dead(id));
            }
        }

        slot.protection += 1;
        if slot.protection > 1 {
            debug!("slot {} protection now {}", id, slot.protection);
            return Ok(());
        }

        let shadow = self.shadow_target(slot, id);
        let link = if slot.terminal {
            // terminal shadows point at the controlling device
            self.inner.fs.symlink(Path::new(TTY_DEVICE), &shadow)
        } else if !slot.named {
            // stdio slots have device-backed primaries; only a symlink
            // can shadow those
            self.inner.fs.symlink(&slot.primary, &shadow)
        } else {
            self.inner.fs.hard_link(&slot.primary, &shadow)
        };
        match link {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                slot.protection = 0;
                return Err(io_err(&shadow, e));
            }
        }
        slot.shadow = Some(shadow.clone());
        slot.homeostat_name = Some(handler_name.to_string());
        slot.homeostat = homeostat;
        faults::register(&shadow);
        drop(slots);

        let weak: Weak<TableInner> = Arc::downgrade(&self.inner);
        let payload = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                homeostat::run(&inner, id);
            }
        });
        if let Err(e) = self.inner.mux.create(
            handler_name,
            1,
            TimerMode::Continuous,
            self.inner.poll_ticks,
            payload,
        ) {
            // roll back so a failed protect leaves the slot untouched
            let mut slots = self.inner.slots.lock();
            if let Ok(slot) = occupied(&mut slots, id) {
                slot.protection = 0;
                slot.homeostat_name = None;
                if !slot.terminal {
                    let _ = self.inner.fs.unlink(&shadow);
                }
                slot.shadow = None;
            }
            faults::unregister(&shadow);
            return Err(ResourceError::Timer(e.to_string()));
        }
        info!(
            "slot {} protected (homeostat '{}', shadow {})",
            id,
            handler_name,
            shadow.display()
        );
        Ok(())
    }

    /// Drop one level of protection; at zero the timer is cancelled, the
    /// shadow removed, and the slot cleared (reserved slots only marked
    /// dead)
    pub fn make_dead(&self, id: SlotId) -> ResourceResult<()> {
        let _hold = self.hold()?;
        let mut slots = self.inner.slots.lock();
        let slot = occupied(&mut slots, id)?;
        if slot.protection == 0 {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(ResourceError::NotProtected(id));
        }
        slot.protection -= 1;
        if slot.protection > 0 {
            debug!("slot {} protection now {}", id, slot.protection);
            return Ok(());
        }

        let name = slot.homeostat_name.take();
        let shadow = slot.shadow.take();
        let terminal = slot.terminal;
        if id < RESERVED_STDIO_SLOTS {
            slot.alive = false;
        } else {
            slots[id] = None;
        }
        drop(slots);

        if let Some(name) = name {
            if let Err(e) = self.inner.mux.cancel(&name) {
                warn!("homeostat timer '{}' already gone: {}", name, e);
            }
        }
        if let Some(shadow) = shadow {
            faults::unregister(&shadow);
            // the terminal device is never unlinked
            if !terminal {
                if let Err(e) = self.inner.fs.unlink(&shadow) {
                    warn!("shadow {} not removed: {}", shadow.display(), e);
                }
            }
        }
        info!("slot {} unprotected", id);
        Ok(())
    }

    /// Close an application-acquired slot, tearing down any remaining
    /// protection first. Reserved slots cannot be closed.
    pub fn close(&self, id: SlotId) -> ResourceResult<()> {
        if id < RESERVED_STDIO_SLOTS {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(ResourceError::Reserved(id));
        }
        let _hold = self.hold()?;
        let mut slots = self.inner.slots.lock();
        let slot = occupied(&mut slots, id)?;
        let name = slot.homeostat_name.take();
        let shadow = slot.shadow.take();
        let file = slot.file.take();
        let terminal = slot.terminal;
        let primary = slot.primary.clone();
        slots[id] = None;
        drop(slots);

        if let Some(name) = name {
            let _ = self.inner.mux.cancel(&name);
        }
        if let Some(shadow) = shadow {
            faults::unregister(&shadow);
            if !terminal {
                let _ = self.inner.fs.unlink(&shadow);
            }
        }
        // descriptor closes here, after all on-disk cleanup
        drop(file);
        info!("resource closed: {} (slot {})", primary.display(), id);
        Ok(())
    }

    /// Exit path: tear down every slot, reserved ones toggled dead
    pub fn release_all(&self) {
        let ids: Vec<SlotId> = {
            let slots = self.inner.slots.lock();
            slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_some())
                .map(|(idx, _)| idx)
                .collect()
        };
        for id in ids {
            if id < RESERVED_STDIO_SLOTS {
                // force protection down to zero, then mark dead
                while self.protection(id).unwrap_or(0) > 0 {
                    let _ = self.make_dead(id);
                }
                if let Some(slot) = self.inner.slots.lock()[id].as_mut() {
                    slot.alive = false;
                }
            } else {
                let _ = self.close(id);
            }
        }
        info!("resource table released");
    }

    // ------------------------------------------------------------------
    // Read-only queries (checkpoint/restart agent interface)
    // ------------------------------------------------------------------

    /// Protection refcount of a slot
    pub fn protection(&self, id: SlotId) -> ResourceResult<u32> {
        let mut slots = self.inner.slots.lock();
        Ok(occupied(&mut slots, id)?.protection)
    }

    /// Whether a slot is currently protected
    pub fn is_protected(&self, id: SlotId) -> bool {
        self.protection(id).map(|p| p > 0).unwrap_or(false)
    }

    /// Shadow path of a slot, if protected
    pub fn shadow_of(&self, id: SlotId) -> Option<PathBuf> {
        let mut slots = self.inner.slots.lock();
        occupied(&mut slots, id).ok()?.shadow.clone()
    }

    /// How many times the primary has been lost and recreated
    pub fn lost_count(&self, id: SlotId) -> ResourceResult<u32> {
        let mut slots = self.inner.slots.lock();
        Ok(occupied(&mut slots, id)?.lost_count)
    }

    /// Full read-only view of one slot
    pub fn info(&self, id: SlotId) -> ResourceResult<ResourceInfo> {
        let mut slots = self.inner.slots.lock();
        Ok(occupied(&mut slots, id)?.info(id))
    }

    /// Read-only view of every occupied slot
    pub fn snapshot(&self) -> Vec<ResourceInfo> {
        self.inner
            .slots
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|s| s.info(idx)))
            .collect()
    }

    fn hold(&self) -> ResourceResult<crate::sigledger::HoldGuard<'_>> {
        self.inner
            .ledger
            .guard(&TABLE_SIGNALS)
            .map_err(|e| ResourceError::Ledger(e.to_string()))
    }

    fn shadow_target(&self, slot: &ResourceSlot, id: SlotId) -> PathBuf {
        if slot.named {
            shadow_path_for(&slot.primary)
        } else {
            // stdio slots have no filesystem name to link beside
            std::env::temp_dir().join(format!(".vigil.{}.{}.shadow", std::process::id(), id))
        }
    }
}

fn occupied(
    slots: &mut [Option<ResourceSlot>],
    id: SlotId,
) -> Result<&mut ResourceSlot, ResourceError> {
    slots
        .get_mut(id)
        .and_then(|slot| slot.as_mut())
        .ok_or_else(|| {
            core::set_last_error(ErrorCode::NoSuchEntry);
            ResourceError::NoSuchSlot(id)
        })
}

fn io_err(path: &Path, source: std::io::Error) -> ResourceError {
    core::set_last_error(ErrorCode::Io);
    ResourceError::Io {
        path: path.to_path_buf(),
        source,
    }
}
