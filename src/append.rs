//! Append Engine (§4.3): the CommitLog itself.
//!
//! The critical section is deliberately small: reserve a position in the
//! active segment, assign queue offset(s) and physical offset(s), write the
//! already-encoded bytes, and release. Durability (flush/commit) and
//! replication handoff happen after the lock is released, via the
//! background services in `durability/` and `ReplicationBridge`.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use parking_lot::{Mutex as PlMutex, RwLock};

use crate::batch::{BatchEncoder, MessageBatch};
use crate::config::{FlushDiskType, Options};
use crate::dispatch::{DispatchSink, ScheduleService};
use crate::durability::{AsyncFlushService, CommitService, Committer, Flusher, GroupCommitService};
use crate::error::{PutMessageStatus, SegmentError};
use crate::lock::{Exclusive, PutLock};
use crate::record::{self, HostAddr, Record, SysFlag};
use crate::recovery::{self, RecoveryOutcome};
use crate::replication::{HaService, ReplicationBridge};
use crate::segment::{Segment, SegmentStore};
use crate::topic_queue_table::TopicQueueTable;

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Outcome of a `put_message` / `put_messages` / `append_data` call.
#[derive(Clone, Debug)]
pub struct AppendResult {
    pub status: PutMessageStatus,
    pub physical_offset: u64,
    pub queue_offset: u64,
    pub message_count: u32,
    /// `storeHost || physicalOffset` of the first record in this append.
    pub msg_id: Vec<u8>,
}

impl AppendResult {
    fn illegal() -> Self {
        AppendResult {
            status: PutMessageStatus::MessageIllegal,
            physical_offset: 0,
            queue_offset: 0,
            message_count: 0,
            msg_id: Vec::new(),
        }
    }

    /// §4.3 step 2: the Segment Store failed to produce a new segment
    /// during rollover.
    fn create_mapped_file_failed() -> Self {
        AppendResult {
            status: PutMessageStatus::CreateMappedFileFailed,
            physical_offset: 0,
            queue_offset: 0,
            message_count: 0,
            msg_id: Vec::new(),
        }
    }

    /// §4.3 step 3: "a second END_OF_FILE is a bug; treat as UNKNOWN_ERROR".
    fn unknown_error() -> Self {
        AppendResult {
            status: PutMessageStatus::UnknownError,
            physical_offset: 0,
            queue_offset: 0,
            message_count: 0,
            msg_id: Vec::new(),
        }
    }
}

/// One segment's live bookkeeping. Position counters are atomics so the
/// durability services can read (and, for flushed/committed, update) them
/// without holding the put lock — only segment *rotation* (swapping which
/// `ActiveSegment` is current) needs the outer `RwLock`'s write guard.
pub struct ActiveSegment<Seg> {
    pub base_offset: u64,
    pub segment: Arc<Seg>,
    pub capacity: u64,
    pub write_pos: AtomicU64,
    pub flushed_pos: AtomicU64,
    pub committed_pos: AtomicU64,
}

struct ActiveFlusher<Seg> {
    active: Arc<RwLock<Arc<ActiveSegment<Seg>>>>,
}

impl<Seg: Segment> Flusher for ActiveFlusher<Seg> {
    fn flush(&self) -> io::Result<()> {
        let seg = self.active.read().clone();
        seg.segment.sync()?;
        seg.flushed_pos.store(seg.write_pos.load(Ordering::Acquire), Ordering::Release);
        Ok(())
    }

    fn flushed_offset(&self) -> u64 {
        let seg = self.active.read().clone();
        seg.base_offset + seg.flushed_pos.load(Ordering::Acquire)
    }

    fn write_offset(&self) -> u64 {
        let seg = self.active.read().clone();
        seg.base_offset + seg.write_pos.load(Ordering::Acquire)
    }
}

struct ActiveCommitter<Seg> {
    active: Arc<RwLock<Arc<ActiveSegment<Seg>>>>,
}

impl<Seg: Segment> Committer for ActiveCommitter<Seg> {
    fn commit(&self) -> io::Result<()> {
        let seg = self.active.read().clone();
        // A plain mmap-backed segment has no separate transient buffer to
        // drain; "commit" degenerates to catching the committed-position
        // marker up to the write position (§4.6). A real transient-pool
        // segment would copy bytes out of its off-heap buffer here instead.
        seg.committed_pos.store(seg.write_pos.load(Ordering::Acquire), Ordering::Release);
        Ok(())
    }

    fn committed_offset(&self) -> u64 {
        let seg = self.active.read().clone();
        seg.base_offset + seg.committed_pos.load(Ordering::Acquire)
    }

    fn write_offset(&self) -> u64 {
        let seg = self.active.read().clone();
        seg.base_offset + seg.write_pos.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct TopicCounter {
    messages: AtomicU64,
    bytes: AtomicU64,
}

/// Per-topic append counters (§4.3 "update per-topic counters"; SPEC_FULL
/// "Observability surface"), read with a relaxed atomic snapshot.
#[derive(Default)]
pub struct Stats {
    by_topic: RwLock<HashMap<String, TopicCounter>>,
}

impl Stats {
    fn record(&self, topic: &str, bytes: u64) {
        let counters = self.by_topic.read();
        if let Some(c) = counters.get(topic) {
            c.messages.fetch_add(1, Ordering::Relaxed);
            c.bytes.fetch_add(bytes, Ordering::Relaxed);
            return;
        }
        drop(counters);
        let mut counters = self.by_topic.write();
        let c = counters.entry(topic.to_string()).or_default();
        c.messages.fetch_add(1, Ordering::Relaxed);
        c.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self, topic: &str) -> (u64, u64) {
        self.by_topic
            .read()
            .get(topic)
            .map(|c| (c.messages.load(Ordering::Relaxed), c.bytes.load(Ordering::Relaxed)))
            .unwrap_or((0, 0))
    }
}

/// The CommitLog engine: Record Codec + Batch Encoder wired to a segment
/// store, a put lock, and the durability/replication services.
pub struct CommitLog<S: SegmentStore, Sch, D, H> {
    opts: Options,
    store: Arc<S>,
    scheduler: Arc<Sch>,
    dispatch: Arc<D>,
    topic_queue_table: Arc<TopicQueueTable>,
    store_host: HostAddr,
    active: Arc<RwLock<Arc<ActiveSegment<S::Seg>>>>,
    put_lock: PutLock<()>,
    batch_encoder: PlMutex<BatchEncoder>,
    stats: Stats,
    lock_time_millis: AtomicU64,
    replication: ReplicationBridge<H>,
    group_commit: Option<GroupCommitService>,
    async_flush: Option<AsyncFlushService>,
    commit_service: Option<CommitService>,
}

impl<S, Sch, D, H> CommitLog<S, Sch, D, H>
where
    S: SegmentStore + 'static,
    S::Seg: 'static,
    Sch: ScheduleService + 'static,
    D: DispatchSink + 'static,
    H: HaService + 'static,
{
    /// Open (or create) the log: run the Recovery Engine over whatever
    /// segments already exist, then make the segment it stopped in the
    /// active one with its position counters seeded from the recovered
    /// boundary (§4.5). There is no clean-shutdown marker in this crate (the
    /// mapped-file pool that would own one is out of scope, §1), so every
    /// open runs the conservative full rescan (abnormal recovery) rather
    /// than trusting all-but-the-last segment.
    pub fn open(
        opts: Options,
        store: Arc<S>,
        scheduler: Arc<Sch>,
        dispatch: Arc<D>,
        topic_queue_table: Arc<TopicQueueTable>,
        store_host: HostAddr,
        ha: H,
    ) -> Result<Self, SegmentError> {
        let offsets = store.existing_offsets()?;
        let active_segment = match offsets.last() {
            Some(_) => {
                let outcome: RecoveryOutcome = recovery::recover(
                    &*store,
                    &*scheduler,
                    &*dispatch,
                    &topic_queue_table,
                    opts.crc_check_enabled,
                    false,
                    None,
                )
                .map_err(|err| SegmentError::Io(io::Error::new(io::ErrorKind::Other, err.to_string())))?;

                let active_base_offset = offsets
                    .iter()
                    .rev()
                    .find(|&&base| base <= outcome.max_physical_offset)
                    .copied()
                    .unwrap_or(offsets[0]);

                for &stale in offsets.iter().filter(|&&base| base > active_base_offset) {
                    store.remove_segment(stale)?;
                }

                let seg = store.open_segment(active_base_offset)?;
                let capacity = seg.capacity();
                let local_pos = outcome.max_physical_offset - active_base_offset;

                if capacity - local_pos >= opts.end_file_min_blank as u64 {
                    let blank = record::encode_blank((capacity - local_pos) as u32);
                    seg.write_at(local_pos, &blank)
                        .map_err(|source| SegmentError::Create { offset: active_base_offset, source })?;
                    seg.sync().map_err(|source| SegmentError::Create { offset: active_base_offset, source })?;
                }

                ActiveSegment {
                    base_offset: active_base_offset,
                    segment: Arc::new(seg),
                    capacity,
                    write_pos: AtomicU64::new(local_pos),
                    flushed_pos: AtomicU64::new(local_pos),
                    committed_pos: AtomicU64::new(local_pos),
                }
            }
            None => {
                let seg = store.create_segment(0, opts.max_segment_size)?;
                ActiveSegment {
                    base_offset: 0,
                    segment: Arc::new(seg),
                    capacity: opts.max_segment_size,
                    write_pos: AtomicU64::new(0),
                    flushed_pos: AtomicU64::new(0),
                    committed_pos: AtomicU64::new(0),
                }
            }
        };

        let active = Arc::new(RwLock::new(Arc::new(active_segment)));

        let flusher = Arc::new(ActiveFlusher { active: active.clone() });
        let group_commit = matches!(opts.flush_disk_type, FlushDiskType::SyncFlush)
            .then(|| GroupCommitService::start(flusher.clone(), opts.group_commit_interval));
        let async_flush = matches!(opts.flush_disk_type, FlushDiskType::AsyncFlush)
            .then(|| AsyncFlushService::start(flusher, opts.flush_interval, opts.flush_least_pages, opts.flush_thorough_interval));
        let commit_service = opts.use_transient_pool.then(|| {
            let committer = Arc::new(ActiveCommitter { active: active.clone() });
            CommitService::start(committer, opts.commit_interval, opts.commit_least_pages)
        });

        let replication = ReplicationBridge::new(opts.broker_role, ha);

        Ok(CommitLog {
            put_lock: PutLock::new(opts.lock_kind, ()),
            opts,
            store,
            scheduler,
            dispatch,
            topic_queue_table,
            store_host,
            active,
            batch_encoder: PlMutex::new(BatchEncoder::new()),
            stats: Stats::default(),
            lock_time_millis: AtomicU64::new(0),
            replication,
            group_commit,
            async_flush,
            commit_service,
        })
    }

    /// `BeginTimeInLock` read-out (§3, §6 "lockTimeMills()"): how long, in
    /// milliseconds, the most recent critical section was held.
    pub fn lock_time_millis(&self) -> u64 {
        self.lock_time_millis.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn min_offset_in_queue(&self, topic: &str, queue_id: i32) -> Option<u64> {
        self.topic_queue_table.min_offset(topic, queue_id)
    }

    pub fn max_offset_in_queue(&self, topic: &str, queue_id: i32) -> Option<u64> {
        self.topic_queue_table.max_offset(topic, queue_id)
    }

    /// Whole-log minimum physical offset still on disk (§6 `getMinOffset`).
    pub fn min_offset(&self) -> Result<u64, SegmentError> {
        Ok(self.store.existing_offsets()?.into_iter().next().unwrap_or(0))
    }

    /// Whole-log maximum physical offset written so far (§6 `getMaxOffset`).
    pub fn max_offset(&self) -> u64 {
        let active = self.active.read().clone();
        active.base_offset + active.write_pos.load(Ordering::Acquire)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put_message(
        &self,
        topic: &str,
        queue_id: i32,
        flag: i32,
        sys_flag: SysFlag,
        mut properties: String,
        body: Vec<u8>,
        born_host: HostAddr,
        prepared_tx_offset: u64,
    ) -> io::Result<AppendResult> {
        let mut props_map = record::parse_properties(&properties);
        let mut effective_topic = topic.to_string();
        let mut effective_queue_id = queue_id;

        if let Some(level) = props_map.get(record::PROP_DELAY).and_then(|s| s.parse::<u8>().ok()) {
            if level > 0 {
                let level = level.min(self.opts.max_delay_level);
                props_map.insert(record::PROP_REAL_TOPIC.to_string(), topic.to_string());
                props_map.insert(record::PROP_REAL_QID.to_string(), queue_id.to_string());
                effective_topic = record::SCHEDULE_TOPIC.to_string();
                effective_queue_id = self.scheduler.delay_level_to_queue_id(level);
                properties = record::encode_properties(&props_map);
            }
        }

        if effective_topic.as_bytes().len() > self.opts.max_topic_len {
            return Ok(AppendResult::illegal());
        }

        let born_timestamp = now_millis();
        let mut record = Record::for_append(
            effective_queue_id,
            flag,
            sys_flag,
            born_timestamp,
            born_host,
            0,
            self.store_host,
            prepared_tx_offset,
            body,
            effective_topic.clone(),
            properties,
        );

        let mut scratch = Vec::new();
        let append_outcome = self.put_lock.with(|_| -> io::Result<AppendResult> {
            let lock_enter = Instant::now();
            record.store_timestamp = now_millis();
            record.queue_offset = self.topic_queue_table.next_queue_offset(&effective_topic, effective_queue_id);

            let mut attempts = 0;
            let result = loop {
                let active = self.active.read().clone();
                scratch.clear();
                record.physical_offset = active.base_offset + active.write_pos.load(Ordering::Acquire);

                let encoded_len = match record::encode_into(
                    &record,
                    self.opts.max_message_size,
                    self.opts.max_topic_len,
                    self.opts.max_props_len,
                    &mut scratch,
                ) {
                    Ok(n) => n as u64,
                    Err(_) => break AppendResult::illegal(),
                };

                let pos = active.write_pos.load(Ordering::Acquire);
                let remaining = active.capacity - pos;
                if encoded_len + self.opts.end_file_min_blank as u64 <= remaining {
                    active.segment.write_at(pos, &scratch)?;
                    active.write_pos.store(pos + encoded_len, Ordering::Release);
                    active.segment.on_appended(pos, encoded_len as usize);
                    break AppendResult {
                        status: PutMessageStatus::PutOk,
                        physical_offset: record.physical_offset,
                        queue_offset: record.queue_offset,
                        message_count: 1,
                        msg_id: record::encode_msg_id(&self.store_host, record.physical_offset),
                    };
                }

                attempts += 1;
                if attempts > 1 {
                    warn!("second END_OF_FILE for the same append, treating as UNKNOWN_ERROR");
                    break AppendResult::unknown_error();
                }
                if let Err(err) = self.rotate(&active) {
                    warn!("failed to create new segment during rollover: {err}");
                    break AppendResult::create_mapped_file_failed();
                }
            };

            let stall = lock_enter.elapsed();
            self.record_lock_time(stall);

            Ok(result)
        })?;

        if append_outcome.status == PutMessageStatus::PutOk {
            self.stats.record(&effective_topic, record.body.len() as u64);
            if !record.sys_flag.transaction_type().is_prepared_or_rollback() {
                let tags_code = if effective_topic == record::SCHEDULE_TOPIC {
                    self.scheduler.deliver_timestamp(
                        props_map.get(record::PROP_DELAY).and_then(|s| s.parse::<u8>().ok()).unwrap_or(0),
                        record.store_timestamp,
                    )
                } else {
                    record.tags().as_deref().map(record::hash_tags).unwrap_or(0)
                };
                let _ = self.dispatch.dispatch(&record, append_outcome.physical_offset, tags_code);
            }
        }

        Ok(self.finish_append(append_outcome, &scratch))
    }

    pub fn put_messages(&self, batch: MessageBatch) -> io::Result<AppendResult> {
        let topic = batch.topic.clone();
        let queue_id = batch.queue_id;
        let count = batch.bodies.len() as u32;

        let encoded = {
            let mut encoder = self.batch_encoder.lock();
            match encoder.encode(&batch, self.opts.max_message_size, self.opts.max_topic_len, self.opts.max_props_len) {
                Ok(e) => e,
                Err(_) => return Ok(AppendResult::illegal()),
            }
        };

        let mut buf = encoded.buf;
        let append_outcome = self.put_lock.with(|_| -> io::Result<AppendResult> {
            let lock_enter = Instant::now();
            let mut attempts = 0;
            let first_queue_offset;
            let physical_offset;

            loop {
                let active = self.active.read().clone();
                let pos = active.write_pos.load(Ordering::Acquire);
                let remaining = active.capacity - pos;
                if buf.len() as u64 + self.opts.end_file_min_blank as u64 <= remaining {
                    physical_offset = active.base_offset + pos;
                    first_queue_offset = self.topic_queue_table.bulk_next_queue_offset(&topic, queue_id, count as u64);
                    for (i, &rec_pos) in encoded.positions.iter().enumerate() {
                        let rec_physical = physical_offset + rec_pos as u64;
                        record::patch_offsets(&mut buf, rec_pos, first_queue_offset + i as u64, rec_physical);
                    }
                    active.segment.write_at(pos, &buf)?;
                    active.write_pos.store(pos + buf.len() as u64, Ordering::Release);
                    active.segment.on_appended(pos, buf.len());
                    break;
                }

                attempts += 1;
                if attempts > 1 {
                    warn!("second END_OF_FILE for the same batch append, treating as UNKNOWN_ERROR");
                    self.record_lock_time(lock_enter.elapsed());
                    return Ok(AppendResult::unknown_error());
                }
                if let Err(err) = self.rotate(&active) {
                    warn!("failed to create new segment during rollover: {err}");
                    self.record_lock_time(lock_enter.elapsed());
                    return Ok(AppendResult::create_mapped_file_failed());
                }
            }

            self.record_lock_time(lock_enter.elapsed());
            Ok(AppendResult {
                status: PutMessageStatus::PutOk,
                physical_offset,
                queue_offset: first_queue_offset,
                message_count: count,
                msg_id: record::encode_msg_id(&self.store_host, physical_offset),
            })
        })?;

        if append_outcome.status == PutMessageStatus::PutOk {
            self.stats.record(&topic, buf.len() as u64);
        }

        Ok(self.finish_append(append_outcome, &buf))
    }

    /// Replication ingress (§4.3 SUPPLEMENTED): a slave applies raw,
    /// already-framed bytes at `physical_offset` without re-deriving
    /// `queueOffset`/`storeTimestamp` — those were assigned by the master.
    /// Only the Record Codec's decode succeeding is revalidated.
    pub fn append_data(&self, physical_offset: u64, bytes: &[u8]) -> io::Result<()> {
        let scheduler = &*self.scheduler;
        match record::decode(bytes, self.opts.crc_check_enabled, scheduler) {
            record::DecodeOutcome::Record { record, .. } => {
                self.topic_queue_table.observe(&record.topic, record.queue_id, record.queue_offset);
            }
            record::DecodeOutcome::EndOfSegment { .. } => {}
            record::DecodeOutcome::Corrupt => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "appendData: corrupt record"));
            }
        }

        self.put_lock.with(|_| -> io::Result<()> {
            let active = self.active.read().clone();
            let local_pos = physical_offset - active.base_offset;
            active.segment.write_at(local_pos, bytes)?;
            let new_pos = local_pos + bytes.len() as u64;
            if new_pos > active.write_pos.load(Ordering::Acquire) {
                active.write_pos.store(new_pos, Ordering::Release);
            }
            Ok(())
        })
    }

    fn record_lock_time(&self, stall: Duration) {
        self.lock_time_millis.store(stall.as_millis() as u64, Ordering::Release);
        if stall > self.opts.in_lock_warn_threshold {
            warn!("put lock held for {stall:?}, exceeding warn threshold {:?}", self.opts.in_lock_warn_threshold);
        }
    }

    /// Write the BLANK trailer for the current segment, fully flush it (a
    /// full segment receives no more writes, so there's no reason to defer
    /// its flush to the background services), and swap in a freshly
    /// created segment.
    fn rotate(&self, active: &Arc<ActiveSegment<S::Seg>>) -> io::Result<()> {
        let pos = active.write_pos.load(Ordering::Acquire);
        let remaining = (active.capacity - pos) as u32;
        let blank = record::encode_blank(remaining);
        active.segment.write_at(pos, &blank)?;
        active.segment.sync()?;
        active.write_pos.store(active.capacity, Ordering::Release);
        active.flushed_pos.store(active.capacity, Ordering::Release);
        active.committed_pos.store(active.capacity, Ordering::Release);

        let next_base_offset = active.base_offset + active.capacity;
        let new_segment = self
            .store
            .create_segment(next_base_offset, self.opts.max_segment_size)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let new_active = Arc::new(ActiveSegment {
            base_offset: next_base_offset,
            segment: Arc::new(new_segment),
            capacity: self.opts.max_segment_size,
            write_pos: AtomicU64::new(0),
            flushed_pos: AtomicU64::new(0),
            committed_pos: AtomicU64::new(0),
        });
        *self.active.write() = new_active;
        debug!("rolled over to new segment at base offset {next_base_offset}");
        Ok(())
    }

    /// Post-lock durability wait + replication handoff + stall logging
    /// (§4.3 "post-lock work").
    fn finish_append(&self, mut result: AppendResult, bytes: &[u8]) -> AppendResult {
        if result.status != PutMessageStatus::PutOk {
            return result;
        }

        let next_physical_offset = result.physical_offset + bytes.len() as u64;
        let _ = self.replication.push(result.physical_offset, bytes);

        match self.opts.flush_disk_type {
            FlushDiskType::SyncFlush => {
                if let Some(group_commit) = &self.group_commit {
                    let status = group_commit.submit(next_physical_offset, self.opts.sync_flush_timeout);
                    if status != PutMessageStatus::PutOk {
                        result.status = status;
                        return result;
                    }
                }
            }
            FlushDiskType::AsyncFlush => {}
        }

        let replication_status = self.replication.wait_for_ack(next_physical_offset, self.opts.sync_flush_timeout);
        if replication_status != PutMessageStatus::PutOk {
            result.status = replication_status;
        }
        result
    }
}

impl<S: SegmentStore, Sch, D, H> Drop for CommitLog<S, Sch, D, H> {
    fn drop(&mut self) {
        let active = self.active.read().clone();
        if let Err(err) = active.segment.sync() {
            warn!("failed to flush active segment on shutdown: {err}");
        }
    }
}
