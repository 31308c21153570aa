//! Write-ahead, append-only persistent log for a distributed message broker.
//!
//! The pieces, in the order data flows through them on append: a record is
//! framed by [`record`] (or batched by [`batch`]), reserved a position and
//! written by [`append::CommitLog`] under the put lock ([`lock`]), then
//! durably flushed/committed by the background services in [`durability`]
//! and handed to [`replication`]. [`recovery`] replays this same framing on
//! startup to rebuild [`topic_queue_table::TopicQueueTable`] state and
//! re-drive [`dispatch::DispatchSink`].

pub mod append;
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod durability;
pub mod error;
pub mod lock;
pub mod record;
pub mod recovery;
pub mod replication;
pub mod segment;
pub mod topic_queue_table;

pub use append::{AppendResult, CommitLog, Stats};
pub use checkpoint::StoreCheckpoint;
pub use config::{BrokerRole, FlushDiskType, LockKind, Options};
pub use dispatch::{DefaultScheduleService, DispatchSink, NullDispatchSink, ScheduleService};
pub use error::{EncodeError, PutMessageStatus, RecoveryError, SegmentError};
pub use record::{HostAddr, Record, SysFlag, TransactionType};
pub use recovery::{recover, RecoveryOutcome};
pub use replication::{HaService, NoReplication, ReplicationBridge};
pub use segment::{FsSegmentStore, MmapSegment, Segment, SegmentStore};
pub use topic_queue_table::TopicQueueTable;
