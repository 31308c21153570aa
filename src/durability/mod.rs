//! Durability services (§4.4, §4.6): three background workers the Append
//! Engine hands completed writes to, instead of doing flush/commit work on
//! the producer's thread.

pub mod async_flush;
pub mod commit_service;
pub mod group_commit;

pub use async_flush::AsyncFlushService;
pub use commit_service::CommitService;
pub use group_commit::GroupCommitService;

/// Bytes per page used to turn a byte gap into a "dirty page count" for the
/// least-pages thresholds (§4.4), matching the 4KiB assumption RocketMQ's
/// flush services make.
pub const PAGE_SIZE: u64 = 4096;

/// What the Async Flush / Group-Commit services call to persist bytes
/// already written to a segment's mapping.
pub trait Flusher: Send + Sync {
    fn flush(&self) -> std::io::Result<()>;
    fn flushed_offset(&self) -> u64;
    fn write_offset(&self) -> u64;
}

/// What the Commit Service calls to move bytes out of the transient buffer
/// and into the segment's own mapping (§4.6), a distinct step from `fsync`.
pub trait Committer: Send + Sync {
    fn commit(&self) -> std::io::Result<()>;
    fn committed_offset(&self) -> u64;
    fn write_offset(&self) -> u64;
}
