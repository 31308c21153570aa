use std::sync::Arc;
use std::time::Duration;

use commitlog::config::{FlushDiskType, LockKind, Options};
use commitlog::dispatch::{DefaultScheduleService, NullDispatchSink};
use commitlog::record::{HostAddr, SysFlag};
use commitlog::replication::NoReplication;
use commitlog::segment::MemSegmentStore;
use commitlog::topic_queue_table::TopicQueueTable;
use commitlog::{AppendResult, CommitLog};

fn host(port: u32) -> HostAddr {
    HostAddr::V4 { ip: [127, 0, 0, 1], port }
}

fn open_log(opts: Options) -> CommitLog<MemSegmentStore, DefaultScheduleService, NullDispatchSink, NoReplication> {
    CommitLog::open(
        opts,
        Arc::new(MemSegmentStore::new()),
        Arc::new(DefaultScheduleService::default()),
        Arc::new(NullDispatchSink),
        Arc::new(TopicQueueTable::new()),
        host(10911),
        NoReplication,
    )
    .unwrap()
}

fn put(log: &CommitLog<MemSegmentStore, DefaultScheduleService, NullDispatchSink, NoReplication>, topic: &str, body: &[u8]) -> AppendResult {
    log.put_message(topic, 0, 0, SysFlag::empty(), String::new(), body.to_vec(), host(9000), 0).unwrap()
}

#[test]
fn sync_flush_acknowledges_once_group_commit_catches_up() {
    let mut opts = Options::default();
    opts.flush_disk_type = FlushDiskType::SyncFlush;
    opts.group_commit_interval = Duration::from_millis(5);
    opts.sync_flush_timeout = Duration::from_secs(5);
    opts.lock_kind = LockKind::Mutex;
    let log = Arc::new(open_log(opts));

    let mut handles = Vec::new();
    for i in 0..6u32 {
        let log = log.clone();
        handles.push(std::thread::spawn(move || put(&log, "orders", format!("m{i}").as_bytes())));
    }
    for h in handles {
        let r = h.join().unwrap();
        assert!(r.status.is_ok(), "expected sync flush to acknowledge within its timeout: {:?}", r.status);
    }
    assert_eq!(log.max_offset_in_queue("orders", 0), Some(5));
}

#[test]
fn async_flush_accepts_puts_without_waiting_on_the_flush_thread() {
    let mut opts = Options::default();
    opts.flush_disk_type = FlushDiskType::AsyncFlush;
    opts.flush_interval = Duration::from_millis(500);
    opts.flush_least_pages = 0;
    let log = open_log(opts);

    for i in 0..4u32 {
        let r = put(&log, "t", format!("payload-{i}").as_bytes());
        assert!(r.status.is_ok());
    }
    assert_eq!(log.max_offset_in_queue("t", 0), Some(3));
}

#[test]
fn transient_commit_service_does_not_block_async_puts() {
    let mut opts = Options::default();
    opts.flush_disk_type = FlushDiskType::AsyncFlush;
    opts.use_transient_pool = true;
    opts.commit_interval = Duration::from_millis(5);
    opts.commit_least_pages = 0;
    let log = open_log(opts);

    for i in 0..10u32 {
        let r = put(&log, "t", format!("p{i}").as_bytes());
        assert!(r.status.is_ok());
    }
    assert_eq!(log.max_offset_in_queue("t", 0), Some(9));
}

#[test]
fn stats_track_per_topic_message_and_byte_counts() {
    let log = open_log(Options::default());
    put(&log, "orders", b"abc");
    put(&log, "orders", b"de");
    put(&log, "other", b"xyz");

    let (messages, bytes) = log.stats().snapshot("orders");
    assert_eq!(messages, 2);
    assert_eq!(bytes, 5);

    let (other_messages, _) = log.stats().snapshot("other");
    assert_eq!(other_messages, 1);

    let (missing_messages, missing_bytes) = log.stats().snapshot("nonexistent");
    assert_eq!((missing_messages, missing_bytes), (0, 0));
}
