//! Recovery Engine (§4.5): rebuild `TopicQueueTable` (and hand records to the
//! `DispatchSink`) by scanning segments at startup, since consumer-queue
//! state isn't itself part of this crate.
//!
//! Two modes, distinguished by how much is trusted without re-reading:
//!
//! - **Normal** recovery (clean shutdown): starts at
//!   `max(segment_count - 3, 0)`, RocketMQ's well-known
//!   `mappedFiles.size() - 3` heuristic (§4.5 "Begin at max(lastThree − 2,
//!   0) segment" — counting the start segment itself, that's the last
//!   three segments). Earlier segments are trusted as-is.
//! - **Abnormal** recovery (crash): nothing is trusted; every segment is
//!   rescanned from the first existing one, truncating at the first
//!   corrupt or incomplete record.
//!
//! Both modes stop at the first undecodable record and report the physical
//! offset recovery reached — the caller is expected to truncate the log to
//! that point before accepting new appends.

use log::{debug, warn};

use crate::dispatch::{DispatchSink, ScheduleService};
use crate::error::RecoveryError;
use crate::record::{self, DecodeOutcome, BLANK_MAGIC, MESSAGE_MAGIC};
use crate::segment::{Segment, SegmentStore};
use crate::topic_queue_table::TopicQueueTable;

#[derive(Debug, Default)]
pub struct RecoveryOutcome {
    /// The physical offset recovery reached; the log should be truncated
    /// here before new appends are accepted.
    pub max_physical_offset: u64,
    pub records_recovered: u64,
    /// `true` if recovery stopped early due to a corrupt or truncated
    /// record rather than running cleanly off the end of the last segment.
    pub truncated: bool,
}

#[allow(clippy::too_many_arguments)]
pub fn recover<S, Sch, D>(
    store: &S,
    scheduler: &Sch,
    dispatch: &D,
    topic_queue_table: &TopicQueueTable,
    crc_check_enabled: bool,
    normal: bool,
    /// Records below this physical offset are known to have already been
    /// processed by a previous run (e.g. a slave's replication-confirmed
    /// point) and are skipped rather than re-dispatched, avoiding duplicate
    /// consumer-queue entries on restart.
    confirm_offset: Option<u64>,
) -> Result<RecoveryOutcome, RecoveryError>
where
    S: SegmentStore,
    Sch: ScheduleService,
    D: DispatchSink,
{
    let offsets = store.existing_offsets()?;
    if offsets.is_empty() {
        return Ok(RecoveryOutcome::default());
    }

    let scan_from = if normal { offsets.len().saturating_sub(3) } else { 0 };
    debug!(
        "recovery starting at segment index {scan_from}/{} ({} mode)",
        offsets.len() - 1,
        if normal { "normal" } else { "abnormal" }
    );

    let mut outcome = RecoveryOutcome {
        max_physical_offset: offsets[scan_from],
        records_recovered: 0,
        truncated: false,
    };

    'segments: for &base_offset in &offsets[scan_from..] {
        let segment = store.open_segment(base_offset)?;
        let capacity = segment.capacity();
        let mut local_pos = 0u64;

        loop {
            if local_pos + 8 > capacity {
                outcome.max_physical_offset = base_offset + local_pos;
                break;
            }

            let header = segment.read_at(local_pos, 8)?;
            let total_size = u32::from_be_bytes(header[0..4].try_into().unwrap());
            let magic = u32::from_be_bytes(header[4..8].try_into().unwrap());

            if magic == BLANK_MAGIC {
                outcome.max_physical_offset = base_offset + local_pos;
                break;
            }
            if magic != MESSAGE_MAGIC || total_size == 0 || local_pos + total_size as u64 > capacity {
                warn!(
                    "recovery: unreadable record at physical offset {}, truncating",
                    base_offset + local_pos
                );
                outcome.max_physical_offset = base_offset + local_pos;
                outcome.truncated = true;
                break 'segments;
            }

            let full = segment.read_at(local_pos, total_size as usize)?;
            match record::decode(&full, crc_check_enabled, scheduler) {
                DecodeOutcome::Record { record, tags_code, size } => {
                    let physical_offset = base_offset + local_pos;
                    let already_confirmed = confirm_offset.is_some_and(|co| physical_offset < co);
                    if !already_confirmed && !record.sys_flag.transaction_type().is_prepared_or_rollback() {
                        dispatch
                            .dispatch(&record, physical_offset, tags_code)
                            .map_err(|source| RecoveryError::Dispatch { offset: physical_offset, source })?;
                        topic_queue_table.observe(&record.topic, record.queue_id, record.queue_offset);
                    }
                    outcome.records_recovered += 1;
                    local_pos += size as u64;
                    outcome.max_physical_offset = base_offset + local_pos;
                }
                DecodeOutcome::EndOfSegment { .. } => {
                    outcome.max_physical_offset = base_offset + local_pos;
                    break;
                }
                DecodeOutcome::Corrupt => {
                    warn!(
                        "recovery: checksum or decode failure at physical offset {}, truncating",
                        base_offset + local_pos
                    );
                    outcome.max_physical_offset = base_offset + local_pos;
                    outcome.truncated = true;
                    break 'segments;
                }
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DefaultScheduleService;
    use crate::record::{HostAddr, Record, SysFlag};
    use crate::segment::MemSegmentStore;
    use std::sync::Mutex;

    struct RecordingDispatch {
        seen: Mutex<Vec<(String, u64)>>,
    }

    impl DispatchSink for RecordingDispatch {
        fn dispatch(&self, record: &Record, physical_offset: u64, _tags_code: i64) -> std::io::Result<()> {
            self.seen.lock().unwrap().push((record.topic.clone(), physical_offset));
            Ok(())
        }
    }

    fn write_record(store: &MemSegmentStore, base_offset: u64, pos: u64, topic: &str, body: &[u8]) -> u32 {
        let rec = Record::for_append(
            0,
            0,
            SysFlag::empty(),
            1,
            HostAddr::V4 { ip: [0; 4], port: 0 },
            1,
            HostAddr::V4 { ip: [0; 4], port: 0 },
            0,
            body.to_vec(),
            topic.to_string(),
            String::new(),
        );
        let mut buf = Vec::new();
        let n = record::encode_into(&rec, 1 << 20, 255, 32_767, &mut buf).unwrap();
        let segment = store.open_segment(base_offset).unwrap();
        segment.write_at(pos, &buf).unwrap();
        n
    }

    #[test]
    fn abnormal_recovery_dispatches_all_records_and_stops_at_blank() {
        let store = MemSegmentStore::new();
        store.create_segment(0, 4096).unwrap();
        let n1 = write_record(&store, 0, 0, "t1", b"one");
        let n2 = write_record(&store, 0, n1 as u64, "t2", b"two");
        let blank = record::encode_blank((4096 - n1 - n2) as u32);
        let segment = store.open_segment(0).unwrap();
        segment.write_at((n1 + n2) as u64, &blank).unwrap();

        let dispatch = RecordingDispatch { seen: Mutex::new(Vec::new()) };
        let table = TopicQueueTable::new();
        let outcome = recover(&store, &DefaultScheduleService::default(), &dispatch, &table, true, false, None).unwrap();

        assert_eq!(outcome.records_recovered, 2);
        assert!(!outcome.truncated);
        assert_eq!(outcome.max_physical_offset, (n1 + n2) as u64);
        assert_eq!(dispatch.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn corrupt_record_truncates_recovery() {
        let store = MemSegmentStore::new();
        store.create_segment(0, 4096).unwrap();
        let n1 = write_record(&store, 0, 0, "t1", b"one");
        let segment = store.open_segment(0).unwrap();
        // Flip a byte inside the body CRC of the (nonexistent) second record's
        // header region so decode reports Corrupt instead of EndOfSegment.
        segment.write_at(n1 as u64, &[0xFF; 8]).unwrap();

        let dispatch = RecordingDispatch { seen: Mutex::new(Vec::new()) };
        let table = TopicQueueTable::new();
        let outcome = recover(&store, &DefaultScheduleService::default(), &dispatch, &table, true, false, None).unwrap();

        assert_eq!(outcome.records_recovered, 1);
        assert!(outcome.truncated);
        assert_eq!(outcome.max_physical_offset, n1 as u64);
    }

    #[test]
    fn normal_recovery_only_rescans_the_last_three_segments() {
        let store = MemSegmentStore::new();
        for (base, topic) in [(0u64, "t0"), (256, "t1"), (512, "t2"), (768, "t3")] {
            store.create_segment(base, 256).unwrap();
            let n = write_record(&store, base, 0, topic, b"x");
            let blank = record::encode_blank(256 - n);
            store.open_segment(base).unwrap().write_at(n as u64, &blank).unwrap();
        }

        let dispatch = RecordingDispatch { seen: Mutex::new(Vec::new()) };
        let table = TopicQueueTable::new();
        let outcome = recover(&store, &DefaultScheduleService::default(), &dispatch, &table, true, true, None).unwrap();

        // 4 segments exist; normal recovery trusts everything before the
        // last 3 (segment at base 0) and rescans base 256, 512, 768 only.
        assert_eq!(outcome.records_recovered, 3);
        let seen_topics: Vec<String> = dispatch.seen.lock().unwrap().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(seen_topics, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn confirm_offset_skips_already_processed_records() {
        let store = MemSegmentStore::new();
        store.create_segment(0, 4096).unwrap();
        let n1 = write_record(&store, 0, 0, "t1", b"one");
        write_record(&store, 0, n1 as u64, "t2", b"two");

        let dispatch = RecordingDispatch { seen: Mutex::new(Vec::new()) };
        let table = TopicQueueTable::new();
        let outcome =
            recover(&store, &DefaultScheduleService::default(), &dispatch, &table, true, false, Some(n1 as u64)).unwrap();

        assert_eq!(outcome.records_recovered, 2);
        assert_eq!(dispatch.seen.lock().unwrap().len(), 1);
        assert_eq!(dispatch.seen.lock().unwrap()[0].0, "t2");
    }
}
