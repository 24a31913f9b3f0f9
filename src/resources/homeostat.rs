/*!
 * Default Homeostat
 * The timer payload that keeps a protected resource healthy: terminal
 * foreground tracking, permission repair, space handling, and
 * primary/shadow recreation
 */

use log::{debug, info, warn};
use nix::libc;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid as NixPid;
use parking_lot::Mutex;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::limits::{NULL_DEVICE, TTY_DEVICE};
use crate::core::types::SlotId;

use super::table::TableInner;
use super::types::{Homeostat, SpacePolicy};

/// Run one homeostat poll for a slot, honoring a custom payload if one
/// was supplied at `make_alive`
pub(crate) fn run(inner: &Arc<TableInner>, id: SlotId) {
    let choice = {
        let slots = inner.slots.lock();
        match slots.get(id).and_then(|slot| slot.as_ref()) {
            Some(slot) if slot.alive && slot.protection > 0 => slot.homeostat.clone(),
            _ => return,
        }
    };
    match choice {
        Homeostat::Default => run_default(inner, id),
        Homeostat::Custom(payload) => payload(id),
    }
}

/// The six-step default repair cycle
fn run_default(inner: &Arc<TableInner>, id: SlotId) {
    let (primary, shadow, terminal, writable, mode_bits, fd) = {
        let slots = inner.slots.lock();
        let Some(slot) = slots.get(id).and_then(|slot| slot.as_ref()) else {
            return;
        };
        (
            slot.primary.clone(),
            slot.shadow.clone(),
            slot.terminal,
            slot.mode.writable(),
            slot.mode_bits,
            slot.fd,
        )
    };

    if terminal {
        track_foreground(inner, fd);
    } else {
        repair_permissions(inner, &primary, mode_bits);
        if writable {
            check_space(inner, id, &primary);
        }
        // a migration may have rebound the primary mid-cycle
        let primary = {
            let slots = inner.slots.lock();
            match slots.get(id).and_then(|slot| slot.as_ref()) {
                Some(slot) => slot.primary.clone(),
                None => return,
            }
        };
        recover_primary(inner, id, &primary, shadow.as_deref());
        recover_shadow(inner, &primary, shadow.as_deref());
    }
    verify_tty_device(inner);
}

/// (a) Redirect the standard streams to the null device while the
/// process group is in the terminal's background, restore on return
fn track_foreground(inner: &Arc<TableInner>, fd: RawFd) {
    let tpgrp = unsafe { libc::tcgetpgrp(fd) };
    if tpgrp < 0 {
        return;
    }
    let pgrp = unsafe { libc::getpgrp() };
    if tpgrp != pgrp {
        inner.tty.to_background();
    } else {
        inner.tty.to_foreground();
    }
}

/// (b) Restore externally altered permission bits
fn repair_permissions(inner: &Arc<TableInner>, primary: &Path, recorded: u32) {
    let Ok(bits) = inner.fs.mode_bits(primary) else {
        return;
    };
    if bits != recorded {
        match inner.fs.set_mode_bits(primary, recorded) {
            Ok(()) => warn!(
                "permissions on {} restored ({:o} -> {:o})",
                primary.display(),
                bits,
                recorded
            ),
            Err(e) => warn!("permissions on {} not restorable: {}", primary.display(), e),
        }
    }
}

/// (c) Filesystem out of space under a write-mode file: block the
/// process group until space returns, or migrate
fn check_space(inner: &Arc<TableInner>, id: SlotId, primary: &Path) {
    let parent = primary.parent().unwrap_or_else(|| Path::new("."));
    match inner.fs.free_blocks(parent) {
        Ok(0) => {}
        _ => return,
    }
    let policy = inner.hooks.read().space.clone();
    match policy {
        SpacePolicy::Warn => {
            warn!(
                "filesystem under {} full; no space policy configured",
                primary.display()
            );
        }
        SpacePolicy::Migrate(hook) => match hook(primary) {
            Ok(new_primary) => {
                info!(
                    "{} migrated to {} (filesystem full)",
                    primary.display(),
                    new_primary.display()
                );
                if let Some(slot) = inner.slots.lock().get_mut(id).and_then(|s| s.as_mut()) {
                    slot.primary = new_primary;
                }
            }
            Err(e) => warn!("migration of {} failed: {}", primary.display(), e),
        },
        SpacePolicy::Block { pgrp } => {
            warn!(
                "filesystem under {} full; stopping process group {}",
                primary.display(),
                pgrp
            );
            let _ = killpg(NixPid::from_raw(pgrp), Signal::SIGTSTP);
            loop {
                std::thread::sleep(inner.poll_duration);
                match inner.fs.free_blocks(parent) {
                    Ok(0) => continue,
                    _ => break,
                }
            }
            let _ = killpg(NixPid::from_raw(pgrp), Signal::SIGCONT);
            info!("space restored; process group {} resumed", pgrp);
        }
    }
}

/// (d) Recreate a vanished primary, via the locate hook or the shadow
fn recover_primary(inner: &Arc<TableInner>, id: SlotId, primary: &Path, shadow: Option<&Path>) {
    if inner.fs.exists(primary) {
        return;
    }
    let locate = inner.hooks.read().locate.clone();
    let recovered = if let Some(found) = locate.and_then(|hook| hook(primary)) {
        debug!("locate hook moved {} to {}", primary.display(), found.display());
        if let Some(slot) = inner.slots.lock().get_mut(id).and_then(|s| s.as_mut()) {
            slot.primary = found;
        }
        true
    } else if let Some(shadow) = shadow {
        match inner.fs.hard_link(shadow, primary) {
            Ok(()) => true,
            Err(e) => {
                warn!("{} lost and not recoverable: {}", primary.display(), e);
                false
            }
        }
    } else {
        false
    };
    if recovered {
        if let Some(slot) = inner.slots.lock().get_mut(id).and_then(|s| s.as_mut()) {
            slot.lost_count += 1;
            warn!(
                "{} lost externally; recreated (lost {} times)",
                primary.display(),
                slot.lost_count
            );
        }
    }
}

/// (e) Recreate a vanished shadow from the primary
fn recover_shadow(inner: &Arc<TableInner>, primary: &Path, shadow: Option<&Path>) {
    let Some(shadow) = shadow else { return };
    if inner.fs.exists(shadow) {
        return;
    }
    match inner.fs.hard_link(primary, shadow) {
        Ok(()) => info!("shadow {} recreated", shadow.display()),
        Err(e) => warn!("shadow {} not recreatable: {}", shadow.display(), e),
    }
}

/// (f) Verify the well-known terminal device node still exists
fn verify_tty_device(inner: &Arc<TableInner>) {
    let device = Path::new(TTY_DEVICE);
    if inner.fs.exists(device) {
        return;
    }
    if let Some(repair) = inner.hooks.read().repair.clone() {
        repair(device);
    } else {
        warn!("{} missing and no repair hook installed", TTY_DEVICE);
    }
}

/// Saved standard-stream state for background/foreground transitions
#[derive(Default)]
pub(crate) struct TtyState {
    background: AtomicBool,
    saved: Mutex<Option<[RawFd; 3]>>,
}

impl TtyState {
    /// Point fds 0–2 at the null device, saving the originals
    pub fn to_background(&self) {
        if self.background.swap(true, Ordering::AcqRel) {
            return;
        }
        let saved = unsafe { [libc::dup(0), libc::dup(1), libc::dup(2)] };
        let null = CString::new(NULL_DEVICE).expect("static path");
        let null_fd = unsafe { libc::open(null.as_ptr(), libc::O_RDWR) };
        if null_fd >= 0 {
            unsafe {
                libc::dup2(null_fd, 0);
                libc::dup2(null_fd, 1);
                libc::dup2(null_fd, 2);
                libc::close(null_fd);
            }
        }
        *self.saved.lock() = Some(saved);
        info!("process group in background; standard streams parked on null device");
    }

    /// Restore the saved standard streams
    pub fn to_foreground(&self) {
        if !self.background.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(saved) = self.saved.lock().take() {
            for (target, fd) in saved.iter().enumerate() {
                if *fd >= 0 {
                    unsafe {
                        libc::dup2(*fd, target as RawFd);
                        libc::close(*fd);
                    }
                }
            }
        }
        info!("process group in foreground; standard streams restored");
    }
}
