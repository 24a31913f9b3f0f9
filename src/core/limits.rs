/*!
 * Table Limits and Intervals
 *
 * Centralized location for capacities, intervals, and protocol constants.
 * All values include rationale comments explaining WHY they exist.
 */

use std::time::Duration;

// =============================================================================
// TIMER MULTIPLEXER
// =============================================================================

/// Default virtual timer table capacity
/// One slot per protected resource plus headroom for application timers
pub const DEFAULT_TIMER_CAPACITY: usize = 32;

/// Default quantum of the single OS periodic interrupt
/// Coarse enough to keep dispatch overhead negligible, fine enough for
/// sub-second homeostat reaction times
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(250);

// =============================================================================
// RESOURCE TABLE
// =============================================================================

/// Default resource slot table capacity
pub const DEFAULT_RESOURCE_CAPACITY: usize = 64;

/// Slots permanently reserved for stdin/stdout/stderr
/// These are toggled alive/dead, never destroyed
pub const RESERVED_STDIO_SLOTS: usize = 3;

/// Default homeostat poll interval, in quantum ticks
/// 4 ticks at the default quantum = one-second self-repair latency
pub const DEFAULT_POLL_TICKS: u32 = 4;

/// Well-known terminal device node the homeostat re-verifies each poll
pub const TTY_DEVICE: &str = "/dev/tty";

/// Null device used when the standard streams are pushed to background
pub const NULL_DEVICE: &str = "/dev/null";

// =============================================================================
// LOCK MANAGER
// =============================================================================

/// Default backoff between lock acquisition attempts
pub const DEFAULT_LOCK_BACKOFF: Duration = Duration::from_millis(100);

/// Minimum link count of a live lock file: the target itself, the lock
/// hard link, and at least one owner marker. Below this the lock is an
/// orphan and may be purged.
pub const MIN_LOCK_LINK_COUNT: u64 = 3;

/// Suffix of a write lock file (on-disk compatibility contract)
pub const WRITE_LOCK_SUFFIX: &str = ".lock";

/// Suffix of a read lock file (on-disk compatibility contract)
pub const READ_LOCK_SUFFIX: &str = ".rdlock";

/// Infix of an owner marker file name (on-disk compatibility contract)
pub const MARKER_INFIX: &str = ".lid.";

/// Suffix of an owner marker file name (on-disk compatibility contract)
pub const MARKER_SUFFIX: &str = ".tmp";

// =============================================================================
// FAULT HANDLING
// =============================================================================

/// Capacity of the async-signal-safe shadow registry consulted by the
/// fatal-fault handler for best-effort cleanup
pub const FAULT_SHADOW_SLOTS: usize = 64;
