/*!
 * POSIX Backends
 * Real implementations of the mask and filesystem seams on top of
 * sigprocmask/sigsuspend, std::fs, and statvfs
 */

use nix::libc;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::statvfs::{statvfs, FsFlags};
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use super::traits::{FsOps, MaskBackend};

/// Process-wide signal mask via sigprocmask
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixMask;

impl PosixMask {
    pub fn new() -> Self {
        Self
    }

    fn sigset(signals: &[Signal]) -> SigSet {
        let mut set = SigSet::empty();
        for sig in signals {
            set.add(*sig);
        }
        set
    }
}

impl MaskBackend for PosixMask {
    fn block(&self, signals: &[Signal]) -> io::Result<()> {
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&Self::sigset(signals)), None)
            .map_err(io::Error::from)
    }

    fn unblock(&self, signals: &[Signal]) -> io::Result<()> {
        sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&Self::sigset(signals)), None)
            .map_err(io::Error::from)
    }

    fn is_pending(&self, signal: Signal) -> bool {
        // nix does not wrap sigpending; the raw calls are harmless
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            if libc::sigpending(&mut set) != 0 {
                return false;
            }
            libc::sigismember(&set, signal as libc::c_int) == 1
        }
    }

    fn wait_for(&self, signal: Signal, safe: &[Signal]) -> io::Result<()> {
        let mut mask = SigSet::all();
        mask.remove(signal);
        for sig in safe {
            mask.remove(*sig);
        }
        // sigsuspend returns on any unblocked delivery; EINTR is success
        match mask.suspend() {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::EINTR) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

/// Host filesystem via std::fs plus statvfs
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixFs;

impl PosixFs {
    pub fn new() -> Self {
        Self
    }
}

impl FsOps for PosixFs {
    fn hard_link(&self, target: &Path, link: &Path) -> io::Result<()> {
        fs::hard_link(target, link)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn nlink(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::symlink_metadata(path)?.nlink())
    }

    fn mode_bits(&self, path: &Path) -> io::Result<u32> {
        Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
    }

    fn set_mode_bits(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    fn read_dir_names(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn free_blocks(&self, path: &Path) -> io::Result<u64> {
        let vfs = statvfs(path).map_err(io::Error::from)?;
        Ok(vfs.blocks_available() as u64)
    }

    fn is_read_only(&self, path: &Path) -> io::Result<bool> {
        let vfs = statvfs(path).map_err(io::Error::from)?;
        Ok(vfs.flags().contains(FsFlags::ST_RDONLY))
    }
}
