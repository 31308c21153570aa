//! Runtime configuration, following the teacher's `Options` pattern
//! (`spacetimedb_commitlog::Options` in `lib.rs`): one struct, one `Default`.

use std::time::Duration;

/// Which exclusive-lock implementation guards the append critical section
/// (§4.3, §9 "Lock choice").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockKind {
    /// Park the thread on contention. Good when producers outnumber cores.
    Mutex,
    /// Busy-wait. Good under light, short-held contention.
    Spin,
}

impl Default for LockKind {
    fn default() -> Self {
        LockKind::Spin
    }
}

/// Whether a producer blocks until the write is fsync'd (§4.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushDiskType {
    SyncFlush,
    AsyncFlush,
}

impl Default for FlushDiskType {
    fn default() -> Self {
        FlushDiskType::AsyncFlush
    }
}

/// The store's role in replication (§4.7, §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BrokerRole {
    SyncMaster,
    AsyncMaster,
    Slave,
}

impl BrokerRole {
    pub fn is_slave(self) -> bool {
        matches!(self, BrokerRole::Slave)
    }
}

/// Knobs for the CommitLog engine and its durability services.
#[derive(Clone, Debug)]
pub struct Options {
    /// Fixed size of each segment file, in bytes.
    pub max_segment_size: u64,
    /// Largest single record (post-encode, including header) this log will
    /// accept.
    pub max_message_size: u64,
    /// Max encoded topic length, in bytes (wire format uses a `u8` prefix).
    pub max_topic_len: usize,
    /// Max encoded properties length, in bytes (wire format uses a `u16`
    /// prefix).
    pub max_props_len: usize,
    /// Minimum blank trailer RocketMQ leaves itself room for before deciding
    /// a record can't fit and rolling the segment (§3 I4).
    pub end_file_min_blank: u32,
    pub lock_kind: LockKind,
    pub flush_disk_type: FlushDiskType,
    /// How long `put_message` waits for `FLUSH_SYNC` acknowledgement before
    /// returning `FLUSH_DISK_TIMEOUT`.
    pub sync_flush_timeout: Duration,
    /// Group-commit waiter sweep cadence (§4.4).
    pub group_commit_interval: Duration,
    /// Async flush service wake cadence (§4.4).
    pub flush_interval: Duration,
    /// Async flush only forces a flush once this many dirty pages accumulate,
    /// except when the thorough interval elapses.
    pub flush_least_pages: u32,
    /// Force a flush at least this often regardless of dirty page count.
    pub flush_thorough_interval: Duration,
    /// Route appends through a transient off-heap buffer, committed by the
    /// Commit Service before the Async/Group-Commit services flush (§4.6).
    pub use_transient_pool: bool,
    /// Commit Service wake cadence, when `use_transient_pool` is set.
    pub commit_interval: Duration,
    /// Commit Service forces a commit once this many dirty pages accumulate.
    pub commit_least_pages: u32,
    /// Highest delay level `SCHEDULE_TOPIC` accepts; levels above this clamp
    /// down (§4.1 tagsCode derivation).
    pub max_delay_level: u8,
    pub broker_role: BrokerRole,
    /// Verify body CRC on decode. Disable only for recovery of a log known to
    /// be already validated, trading integrity checking for scan speed.
    pub crc_check_enabled: bool,
    /// In-lock duration past which `CommitLog` logs a stall warning (§6).
    pub in_lock_warn_threshold: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_segment_size: 1024 * 1024 * 1024,
            max_message_size: 4 * 1024 * 1024,
            max_topic_len: 255,
            max_props_len: 32_767,
            end_file_min_blank: 8,
            lock_kind: LockKind::default(),
            flush_disk_type: FlushDiskType::default(),
            sync_flush_timeout: Duration::from_secs(5),
            group_commit_interval: Duration::from_millis(10),
            flush_interval: Duration::from_millis(500),
            flush_least_pages: 4,
            flush_thorough_interval: Duration::from_secs(10),
            use_transient_pool: false,
            commit_interval: Duration::from_millis(200),
            commit_least_pages: 4,
            max_delay_level: 18,
            broker_role: BrokerRole::AsyncMaster,
            crc_check_enabled: true,
            in_lock_warn_threshold: Duration::from_millis(500),
        }
    }
}
