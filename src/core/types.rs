/*!
 * Core Types
 * Common types shared across the resilience substrate
 */

use serde::{Deserialize, Serialize};

/// Process ID type (POSIX pid_t)
pub type Pid = i32;

/// Slot index into one of the fixed-capacity tables
pub type SlotId = usize;

/// Logical timer priority (higher fires first within a quantum)
pub type Priority = u32;

/// Interval expressed in quantum ticks
pub type Ticks = u32;

/// Identity of this process as embedded in on-disk owner markers
///
/// The marker file name is a compatibility contract with cooperating
/// processes, so every field here ends up on disk verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Application name (no dots; dots would corrupt the marker format)
    pub app: String,
    /// Host the process runs on
    pub host: String,
    /// Optional signal-relay port for remote liveness probes
    pub port: Option<u16>,
    /// Process id on that host
    pub pid: Pid,
}

impl Identity {
    /// Identity of the calling process, host name taken from the OS
    pub fn local(app: impl Into<String>) -> Self {
        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            app: sanitize(app.into()),
            host: sanitize(host),
            port: None,
            pid: std::process::id() as Pid,
        }
    }

    /// Same identity with a relay port attached
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Dots are field separators in marker file names
fn sanitize(s: String) -> String {
    s.replace('.', "_")
}

/// Access mode requested when a resource is acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    /// Whether the mode permits writing (drives the filesystem-full check)
    pub fn writable(&self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}
