/*!
 * Fault-Path Shadow Registry
 * Fixed array of shadow paths a fatal-fault handler can unlink without
 * allocating or locking
 */

use nix::libc;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::core::limits::FAULT_SHADOW_SLOTS;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: AtomicPtr<libc::c_char> = AtomicPtr::new(ptr::null_mut());
static SHADOWS: [AtomicPtr<libc::c_char>; FAULT_SHADOW_SLOTS] = [EMPTY; FAULT_SHADOW_SLOTS];

/// Record a shadow path for best-effort cleanup on a fatal fault.
/// Silently drops the entry if the registry is full.
pub(crate) fn register(path: &Path) {
    let Ok(cstr) = CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    let raw = cstr.into_raw();
    for slot in &SHADOWS {
        if slot
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }
    // registry full; reclaim the allocation
    unsafe {
        drop(CString::from_raw(raw));
    }
}

/// Forget a shadow path once its slot is made dead
pub(crate) fn unregister(path: &Path) {
    let bytes = path.as_os_str().as_bytes();
    for slot in &SHADOWS {
        let raw = slot.load(Ordering::Acquire);
        if raw.is_null() {
            continue;
        }
        let matches = unsafe { std::ffi::CStr::from_ptr(raw) }.to_bytes() == bytes;
        if matches
            && slot
                .compare_exchange(raw, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            unsafe {
                drop(CString::from_raw(raw));
            }
            return;
        }
    }
}

/// Unlink every registered shadow. Called from the fatal-fault handler,
/// so only async-signal-safe calls are made.
pub fn cleanup_shadows() {
    for slot in &SHADOWS {
        let raw = slot.load(Ordering::Acquire);
        if !raw.is_null() {
            unsafe {
                libc::unlink(raw);
            }
        }
    }
}

extern "C" fn on_fault(sig: libc::c_int) {
    cleanup_shadows();
    unsafe {
        libc::_exit(128 + sig);
    }
}

/// Install the fatal-fault handler: best-effort shadow cleanup followed
/// by a fatal exit
pub fn install_fault_handler() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction =
            on_fault as extern "C" fn(libc::c_int) as *const () as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in [libc::SIGSEGV, libc::SIGBUS, libc::SIGFPE, libc::SIGILL] {
            libc::sigaction(sig, &action, ptr::null_mut());
        }
    }
}
