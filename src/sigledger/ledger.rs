/*!
 * Signal Ledger
 * Nested, reference-counted signal blocking with pending-signal flush
 * guarantees
 */

use log::{debug, trace};
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::core::{self, ErrorCode};
use crate::platform::MaskBackend;

use super::types::{holdable, SignalError, SignalResult, SAFE_SET};

/// Per-signal and global hold counters
#[derive(Debug, Default)]
struct HoldCounts {
    per: HashMap<i32, u32>,
    global: u64,
}

/// Which thread, if any, is currently inside timer dispatch
#[derive(Debug, Default)]
struct HandlerContext {
    depth: usize,
    thread: Option<ThreadId>,
}

/// Nested signal blocking. The 0→1 transition is the only point at which
/// the OS mask changes; the 1→0 transition is the only point at which it
/// is restored. Counts are process-wide and reset at construction.
pub struct SignalLedger {
    backend: Arc<dyn MaskBackend>,
    counts: Mutex<HoldCounts>,
    handler: Mutex<HandlerContext>,
}

impl SignalLedger {
    pub fn new(backend: Arc<dyn MaskBackend>) -> Self {
        Self {
            backend,
            counts: Mutex::new(HoldCounts::default()),
            handler: Mutex::new(HandlerContext::default()),
        }
    }

    /// Whether the calling thread is executing inside timer-dispatch
    /// context, where the ambient mask already holds everything this
    /// ledger would. Scoped to the dispatching thread: holds taken on
    /// other threads while dispatch runs stay fully effective.
    pub fn in_handler_context(&self) -> bool {
        let ctx = self.handler.lock();
        ctx.depth > 0 && ctx.thread == Some(thread::current().id())
    }

    pub(crate) fn enter_handler_context(&self) {
        let mut ctx = self.handler.lock();
        if ctx.depth == 0 {
            ctx.thread = Some(thread::current().id());
        }
        ctx.depth += 1;
    }

    pub(crate) fn exit_handler_context(&self) {
        let mut ctx = self.handler.lock();
        if ctx.depth == 0 {
            drop(ctx);
            core::fatal("sigledger", "handler context exit without matching enter");
        }
        ctx.depth -= 1;
        if ctx.depth == 0 {
            ctx.thread = None;
        }
    }

    /// Block `signals`, nesting via reference counts
    pub fn hold(&self, signals: &[Signal]) -> SignalResult<()> {
        self.validate(signals)?;
        if self.in_handler_context() {
            trace!("hold in handler context is a no-op");
            return Ok(());
        }
        let mut counts = self.counts.lock();
        let mut newly = Vec::new();
        for sig in signals {
            let count = counts.per.entry(*sig as i32).or_insert(0);
            *count += 1;
            if *count == 1 {
                newly.push(*sig);
            }
        }
        counts.global += signals.len() as u64;
        if !newly.is_empty() {
            self.backend.block(&newly)?;
            debug!("mask extended by {:?}", newly);
        }
        Ok(())
    }

    /// Unblock `signals`; a release without a matching hold is fatal
    pub fn release(&self, signals: &[Signal]) -> SignalResult<()> {
        self.validate(signals)?;
        if self.in_handler_context() {
            trace!("release in handler context is a no-op");
            return Ok(());
        }
        let mut counts = self.counts.lock();
        let mut cleared = Vec::new();
        for sig in signals {
            match counts.per.get_mut(&(*sig as i32)) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    if *count == 0 {
                        cleared.push(*sig);
                    }
                }
                _ => core::fatal(
                    "sigledger",
                    &format!("release of {:?} without matching hold", sig),
                ),
            }
        }
        if counts.global < signals.len() as u64 {
            core::fatal("sigledger", "global hold count underflow");
        }
        counts.global -= signals.len() as u64;
        if !cleared.is_empty() {
            self.backend.unblock(&cleared)?;
            debug!("mask restored for {:?}", cleared);
        }
        Ok(())
    }

    /// Block a single signal. With `defer == false`, a pending instance
    /// of `signal` is delivered (with only the safe set open) before the
    /// wider hold is established, so nothing is silently dropped.
    pub fn hold_one(&self, signal: Signal, defer: bool) -> SignalResult<()> {
        if !holdable(signal) {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(SignalError::Unholdable(signal));
        }
        if self.in_handler_context() {
            trace!("hold_one in handler context is a no-op");
            return Ok(());
        }
        if !defer && self.held(signal) == 0 && self.backend.is_pending(signal) {
            debug!("{:?} pending before hold; suspending until delivered", signal);
            self.backend.wait_for(signal, &SAFE_SET)?;
        }
        self.hold(&[signal])
    }

    /// Release a single signal held via `hold_one` (or `hold`)
    pub fn release_one(&self, signal: Signal) -> SignalResult<()> {
        if !holdable(signal) {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(SignalError::Unholdable(signal));
        }
        self.release(&[signal])
    }

    /// Current hold count of `signal`
    pub fn held(&self, signal: Signal) -> u32 {
        self.counts
            .lock()
            .per
            .get(&(signal as i32))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all outstanding holds
    pub fn global_holds(&self) -> u64 {
        self.counts.lock().global
    }

    /// Hold `signals` for a lexical scope; released on every exit path
    pub fn guard<'a>(&'a self, signals: &[Signal]) -> SignalResult<HoldGuard<'a>> {
        // holds taken inside handler context no-op, so the matching
        // release must no-op too, whatever context the drop runs in
        let effective = !self.in_handler_context();
        self.hold(signals)?;
        Ok(HoldGuard {
            ledger: self,
            signals: signals.to_vec(),
            effective,
        })
    }

    fn validate(&self, signals: &[Signal]) -> SignalResult<()> {
        if signals.is_empty() {
            core::set_last_error(ErrorCode::InvalidArgument);
            return Err(SignalError::EmptySet);
        }
        for sig in signals {
            if !holdable(*sig) {
                core::set_last_error(ErrorCode::InvalidArgument);
                return Err(SignalError::Unholdable(*sig));
            }
        }
        Ok(())
    }
}

/// Scoped hold: releases its signal set when dropped, including on early
/// return and error paths
pub struct HoldGuard<'a> {
    ledger: &'a SignalLedger,
    signals: Vec<Signal>,
    effective: bool,
}

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        if !self.effective {
            return;
        }
        // counts were incremented at construction, so the release cannot
        // underflow; backend failure here is unrecoverable anyway
        let _ = self.ledger.release(&self.signals);
    }
}
