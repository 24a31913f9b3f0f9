/*!
 * Liveness Probes
 * Local owners are probed with a null signal; remote owners go through
 * an injected signal relay
 */

use nix::sys::signal::kill;
use nix::unistd::Pid as NixPid;

use crate::core::types::Identity;

use super::marker::OwnerMarker;

/// Externally supplied "signal a process on host X" primitive used to
/// probe (and, if ever needed, terminate) remote lock owners
pub trait SignalRelay: Send + Sync {
    /// Whether the remote owner is still alive
    fn alive(&self, marker: &OwnerMarker) -> bool;

    /// Ask the remote side to terminate the owner; default is a refusal
    fn terminate(&self, _marker: &OwnerMarker) -> bool {
        false
    }
}

/// Relay used when none is injected: never declares a remote owner
/// dead, so an unreachable relay cannot break mutual exclusion
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRelay;

impl SignalRelay for NullRelay {
    fn alive(&self, _marker: &OwnerMarker) -> bool {
        true
    }
}

/// Probe a marker's owner: local pids get a null-signal probe, remote
/// ones are delegated to the relay
pub fn probe(identity: &Identity, relay: &dyn SignalRelay, marker: &OwnerMarker) -> bool {
    if marker.host == identity.host {
        // ESRCH means gone; EPERM means alive but foreign
        match kill(NixPid::from_raw(marker.pid), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    } else {
        relay.alive(marker)
    }
}
