use std::sync::{Arc, Mutex};

use commitlog::config::Options;
use commitlog::dispatch::{DefaultScheduleService, DispatchSink, NullDispatchSink};
use commitlog::record::{HostAddr, Record, SysFlag};
use commitlog::replication::NoReplication;
use commitlog::segment::MemSegmentStore;
use commitlog::topic_queue_table::TopicQueueTable;
use commitlog::{recover, CommitLog};

fn host(port: u32) -> HostAddr {
    HostAddr::V4 { ip: [127, 0, 0, 1], port }
}

struct RecordingDispatch {
    seen: Mutex<Vec<(String, i32, u64)>>,
}

impl DispatchSink for RecordingDispatch {
    fn dispatch(&self, record: &Record, _physical_offset: u64, _tags_code: i64) -> std::io::Result<()> {
        self.seen.lock().unwrap().push((record.topic.clone(), record.queue_id, record.queue_offset));
        Ok(())
    }
}

#[test]
fn abnormal_recovery_rebuilds_topic_queue_table_from_a_live_log() {
    let store = Arc::new(MemSegmentStore::new());
    let scheduler = Arc::new(DefaultScheduleService::default());

    {
        let log = CommitLog::open(
            Options::default(),
            store.clone(),
            scheduler.clone(),
            Arc::new(NullDispatchSink),
            Arc::new(TopicQueueTable::new()),
            host(10911),
            NoReplication,
        )
        .unwrap();

        for i in 0..5u32 {
            let r = log
                .put_message("orders", 0, 0, SysFlag::empty(), String::new(), format!("msg-{i}").into_bytes(), host(9000), 0)
                .unwrap();
            assert!(r.status.is_ok());
        }
        // `log` drops here, flushing the active segment.
    }

    let dispatch = RecordingDispatch { seen: Mutex::new(Vec::new()) };
    let fresh_table = TopicQueueTable::new();
    let outcome = recover(&*store, &*scheduler, &dispatch, &fresh_table, true, false, None).unwrap();

    assert_eq!(outcome.records_recovered, 5);
    assert!(!outcome.truncated);
    assert_eq!(fresh_table.max_offset("orders", 0), Some(4));

    let seen = dispatch.seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    for (i, (topic, queue_id, queue_offset)) in seen.iter().enumerate() {
        assert_eq!(topic, "orders");
        assert_eq!(*queue_id, 0);
        assert_eq!(*queue_offset, i as u64);
    }
}

#[test]
fn recovery_never_dispatches_a_blank_trailer() {
    let store = Arc::new(MemSegmentStore::new());
    let scheduler = Arc::new(DefaultScheduleService::default());

    {
        let mut opts = Options::default();
        opts.max_segment_size = 256;
        let log = CommitLog::open(
            opts,
            store.clone(),
            scheduler.clone(),
            Arc::new(NullDispatchSink),
            Arc::new(TopicQueueTable::new()),
            host(10911),
            NoReplication,
        )
        .unwrap();

        // Force at least one rollover, which writes a BLANK trailer into the
        // first segment.
        for i in 0..10u32 {
            log.put_message("t", 0, 0, SysFlag::empty(), String::new(), format!("payload-{i}").into_bytes(), host(9000), 0)
                .unwrap();
        }
    }

    let dispatch = RecordingDispatch { seen: Mutex::new(Vec::new()) };
    let table = TopicQueueTable::new();
    let outcome = recover(&*store, &*scheduler, &dispatch, &table, true, false, None).unwrap();

    assert_eq!(outcome.records_recovered, 10);
    assert_eq!(dispatch.seen.lock().unwrap().len(), 10);
    assert!(!outcome.truncated);
}

#[test]
fn recovery_is_idempotent_on_an_already_recovered_store() {
    let store = Arc::new(MemSegmentStore::new());
    let scheduler = Arc::new(DefaultScheduleService::default());

    {
        let log = CommitLog::open(
            Options::default(),
            store.clone(),
            scheduler.clone(),
            Arc::new(NullDispatchSink),
            Arc::new(TopicQueueTable::new()),
            host(10911),
            NoReplication,
        )
        .unwrap();
        for i in 0..3u32 {
            log.put_message("t", 0, 0, SysFlag::empty(), String::new(), format!("m{i}").into_bytes(), host(9000), 0).unwrap();
        }
    }

    let dispatch = RecordingDispatch { seen: Mutex::new(Vec::new()) };
    let table = TopicQueueTable::new();
    let first = recover(&*store, &*scheduler, &dispatch, &table, true, false, None).unwrap();
    let second = recover(&*store, &*scheduler, &dispatch, &table, true, false, None).unwrap();

    assert_eq!(first.max_physical_offset, second.max_physical_offset);
    assert_eq!(first.records_recovered, second.records_recovered);
}
