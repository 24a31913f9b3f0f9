/*!
 * Platform Traits
 * Seams over the OS signal mask and the filesystem primitives the lock
 * protocol and the homeostat are built from, so alternative backends
 * (and test doubles) can be supplied on non-POSIX targets
 */

use nix::sys::signal::Signal;
use std::io;
use std::path::Path;

/// OS signal-mask operations used by the signal ledger
///
/// Only mask transitions go through here; the ledger owns all counting.
pub trait MaskBackend: Send + Sync {
    /// Add the given signals to the process mask
    fn block(&self, signals: &[Signal]) -> io::Result<()>;

    /// Remove the given signals from the process mask
    fn unblock(&self, signals: &[Signal]) -> io::Result<()>;

    /// Whether an instance of `signal` is pending delivery
    fn is_pending(&self, signal: Signal) -> bool;

    /// Suspend the caller until `signal` is delivered to its handler,
    /// with everything except `safe` (and `signal` itself) blocked
    fn wait_for(&self, signal: Signal, safe: &[Signal]) -> io::Result<()>;
}

/// Filesystem primitives behind the lock protocol and resource shadows
///
/// The atomicity of `hard_link` is the distributed-locking contract;
/// everything else is ordinary metadata access.
pub trait FsOps: Send + Sync {
    /// Create a hard link; fails with `AlreadyExists` if `link` exists
    fn hard_link(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Create a symbolic link (terminal-device shadows)
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Remove a file or link
    fn unlink(&self, path: &Path) -> io::Result<()>;

    /// Whether `path` resolves (without following final symlinks)
    fn exists(&self, path: &Path) -> bool;

    /// Hard-link count of `path`
    fn nlink(&self, path: &Path) -> io::Result<u64>;

    /// Permission bits of `path` (the low 12 mode bits)
    fn mode_bits(&self, path: &Path) -> io::Result<u32>;

    /// Restore permission bits on `path`
    fn set_mode_bits(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// File names (not paths) in directory `dir`
    fn read_dir_names(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// Free blocks available to unprivileged writers on the filesystem
    /// holding `path`
    fn free_blocks(&self, path: &Path) -> io::Result<u64>;

    /// Whether the filesystem holding `path` is mounted read-only
    fn is_read_only(&self, path: &Path) -> io::Result<bool>;
}
