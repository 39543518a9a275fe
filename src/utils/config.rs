//! Application tuning constants.
//! Read-size policy knobs, wait thresholds and memory defaults in one place.

use std::time::Duration;

// ---- Read-size policy ----

/// Increment sizing for the progressive hash schedule.
pub struct ReadSizeConsts;

impl ReadSizeConsts {
    /// Pages worth reading per seek on a balanced device; the base unit of
    /// the increment schedule. First-generation reads are
    /// `BALANCED_PAGES * page_size` bytes.
    pub const BALANCED_PAGES: u64 = 4;

    /// Upper bound on a single increment (bytes). The offset factor
    /// saturates at `MAX_READ_SIZE / (BALANCED_PAGES * page_size)`.
    pub const MAX_READ_SIZE: u64 = 256 * 1024 * 1024;

    /// Growth of the offset factor per generation.
    pub const FACTOR_GROWTH: u64 = 8;

    /// Largest byte-exact comparison buffer per increment (bytes).
    /// Also the per-increment cap applied to `next_offset` in paranoid mode.
    pub const PARANOID_MAX_INCREMENT: u64 = 16 * 1024 * 1024;

    /// Max increment factor, given a page size.
    pub fn max_read_factor(page_size: u64) -> u64 {
        Self::MAX_READ_SIZE / (Self::BALANCED_PAGES * page_size)
    }
}

// ---- Device worker ----

/// Device worker loop tuning.
pub struct DeviceConsts;

impl DeviceConsts {
    /// Bounded wait on an empty queue while the device still has remaining
    /// files. Keeps a starving device from spinning through the joiner.
    pub const EMPTY_QUEUE_WAIT: Duration = Duration::from_millis(50);

    /// Above this increment size a worker never blocks on the hash result;
    /// the seek saved is not worth idling the device thread.
    pub const TOO_MANY_BYTES_TO_WAIT: u64 = 64 * 1024 * 1024;

    /// Cached device counter deltas are flushed to the session after this
    /// many file events (or when the device drains).
    pub const COUNTER_BATCH: i64 = 16;
}

// ---- Paranoid pre-matching ----

/// Increments larger than this register with the group so sibling classes
/// can feed twin candidates into the running byte comparison.
pub fn prematch_threshold(page_size: u64) -> u64 {
    ReadSizeConsts::BALANCED_PAGES * page_size
}

// ---- Memory ----

/// Session memory model defaults.
pub struct MemConsts;

impl MemConsts {
    /// Empirical bookkeeping cost per file record (bytes), excluding read
    /// buffers and paranoid buffers.
    pub const AVERAGE_MEM_PER_FILE: u64 = 100;

    /// Default paranoid comparison budget (bytes).
    pub const DEFAULT_PARANOID_MEM: u64 = 256 * 1024 * 1024;

    /// Default read buffer budget (bytes).
    pub const DEFAULT_READ_BUFFER_MEM: u64 = 256 * 1024 * 1024;

    /// Fraction of system memory used for the default total budget.
    pub const TOTAL_MEM_DIVISOR: u64 = 4;
}

// ---- Pass quotas ----

/// Per-round sweep budgets, split across devices each pass.
pub struct SweepConsts;

impl SweepConsts {
    /// Total bytes hashed per pass across all devices.
    pub const DEFAULT_SWEEP_SIZE: u64 = 1024 * 1024 * 1024;

    /// Total files processed per pass across all devices.
    pub const DEFAULT_SWEEP_COUNT: u64 = 10 * 1024;
}

// ---- Hasher ----

/// Hasher I/O chunking.
pub struct HasherConsts;

impl HasherConsts {
    /// Chunk size for reading an increment (bytes). 1 MB.
    pub const READ_CHUNK_SIZE: usize = 1024 * 1024;
}

/// Page size fallback when sysconf is unavailable.
pub const FALLBACK_PAGE_SIZE: u64 = 4096;

/// Query the system page size.
pub fn page_size() -> u64 {
    // SAFETY: sysconf with a valid name has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 { n as u64 } else { FALLBACK_PAGE_SIZE }
}

/// Longest possible symlink target, used to size symlink digests.
pub fn symlink_max_size() -> u64 {
    libc::PATH_MAX as u64 + 1
}
