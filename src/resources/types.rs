/*!
 * Resource Types
 * Slot layout, capability hooks, and errors for the homeostatic
 * resource table
 */

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::core::types::{AccessMode, SlotId};

/// Resource operation result
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Resource table errors
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Resource table full")]
    TableFull,

    #[error("No such resource slot: {0}")]
    NoSuchSlot(SlotId),

    #[error("Resource slot {0} is dead")]
    Dead(SlotId),

    #[error("Resource slot {0} is not protected")]
    NotProtected(SlotId),

    #[error("Reserved standard-stream slot {0} cannot be acquired or closed")]
    Reserved(SlotId),

    #[error("Invalid resource path")]
    InvalidPath,

    #[error("Timer error while arming homeostat: {0}")]
    Timer(String),

    #[error("Signal ledger failure: {0}")]
    Ledger(String),

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Homeostat payload choice: the built-in six-step repair cycle or a
/// caller-supplied payload. A closed capability set instead of a raw
/// function pointer keeps late binding type-safe.
#[derive(Clone)]
pub enum Homeostat {
    Default,
    Custom(Arc<dyn Fn(SlotId) + Send + Sync>),
}

/// Caller-supplied relocation of a lost primary; returns the path the
/// resource now lives at, or None to fall back to the shadow link
pub type LocateHook = Arc<dyn Fn(&Path) -> Option<PathBuf> + Send + Sync>;

/// Caller-supplied migration of a write-mode file off a full filesystem;
/// returns the new primary path
pub type MigrateHook = Arc<dyn Fn(&Path) -> std::io::Result<PathBuf> + Send + Sync>;

/// Recreation of the well-known terminal device node via an external
/// helper
pub type RepairHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// What the homeostat does when a write-mode file's filesystem runs out
/// of space
#[derive(Clone)]
pub enum SpacePolicy {
    /// Log the condition and leave the file alone
    Warn,
    /// Stop the given process group until space returns. Must name a
    /// group that does not contain the homeostat thread: stopping one's
    /// own group freezes the very poll loop that would send the resume.
    Block { pgrp: crate::core::Pid },
    /// Hand the file to a caller-supplied migration callback
    Migrate(MigrateHook),
}

impl Default for SpacePolicy {
    fn default() -> Self {
        SpacePolicy::Warn
    }
}

/// Late-bound behaviors consulted by the default homeostat
#[derive(Clone, Default)]
pub struct Hooks {
    pub space: SpacePolicy,
    pub locate: Option<LocateHook>,
    pub repair: Option<RepairHook>,
}

/// One entry of the resource table
pub(crate) struct ResourceSlot {
    pub fd: RawFd,
    /// Keeps acquired descriptors open; reserved stdio slots borrow theirs
    pub file: Option<File>,
    pub primary: PathBuf,
    pub shadow: Option<PathBuf>,
    pub protection: u32,
    pub lost_count: u32,
    /// Whether this process created the underlying file
    pub creator: bool,
    /// Whether the slot is backed by a filesystem name (stdio slots are not)
    pub named: bool,
    pub alive: bool,
    pub terminal: bool,
    pub mode: AccessMode,
    pub mode_bits: u32,
    pub homeostat_name: Option<String>,
    pub homeostat: Homeostat,
}

/// Read-only view of a slot, served to the checkpoint/restart agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub slot: SlotId,
    pub primary: PathBuf,
    pub shadow: Option<PathBuf>,
    pub protection: u32,
    pub lost_count: u32,
    pub alive: bool,
    pub terminal: bool,
    pub named: bool,
    pub creator: bool,
}

impl ResourceSlot {
    pub fn info(&self, slot: SlotId) -> ResourceInfo {
        ResourceInfo {
            slot,
            primary: self.primary.clone(),
            shadow: self.shadow.clone(),
            protection: self.protection,
            lost_count: self.lost_count,
            alive: self.alive,
            terminal: self.terminal,
            named: self.named,
            creator: self.creator,
        }
    }
}

/// Shadow link beside the primary: `.<name>.shadow`. Not part of the
/// on-disk lock contract; cooperating processes never parse it.
pub fn shadow_path_for(primary: &Path) -> PathBuf {
    let name = primary
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed");
    let parent = primary.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{}.shadow", name))
}
