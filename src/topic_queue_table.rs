//! TopicQueueTable (§3): next `queueOffset` to hand out per (topic,
//! queueId), plus the min/max bookkeeping the dispatch consumer needs.
//!
//! Offset assignment (`next_queue_offset`) is always called from inside the
//! Append Engine's put lock, so ordering is derived from lock acquisition
//! order, not from any ordering guarantee internal to this table. The
//! internal `RwLock` exists only so min/max queries (read-only, called from
//! outside the put lock by consumer-queue rebuild code) don't contend with
//! unrelated topics' appends.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Clone, Copy, Debug, Default)]
struct QueueOffsets {
    next: u64,
    min: u64,
}

#[derive(Default)]
pub struct TopicQueueTable {
    table: RwLock<HashMap<(String, i32), QueueOffsets>>,
}

impl TopicQueueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `queueOffset` to assign to the next record for
    /// `(topic, queue_id)`, and advances the table's counter past it.
    pub fn next_queue_offset(&self, topic: &str, queue_id: i32) -> u64 {
        let mut table = self.table.write();
        let entry = table.entry((topic.to_string(), queue_id)).or_default();
        let offset = entry.next;
        entry.next += 1;
        offset
    }

    /// Reserve `count` consecutive offsets for a batch append (§4.2),
    /// returning the first one.
    pub fn bulk_next_queue_offset(&self, topic: &str, queue_id: i32, count: u64) -> u64 {
        let mut table = self.table.write();
        let entry = table.entry((topic.to_string(), queue_id)).or_default();
        let first = entry.next;
        entry.next += count;
        first
    }

    /// Record that `offset` has been durably assigned, without consuming a
    /// new one — used by `appendData` (§4.3 supplement) when ingesting
    /// pre-assigned offsets from a replication stream.
    pub fn observe(&self, topic: &str, queue_id: i32, offset: u64) {
        let mut table = self.table.write();
        let entry = table.entry((topic.to_string(), queue_id)).or_default();
        if offset >= entry.next {
            entry.next = offset + 1;
        }
    }

    pub fn min_offset(&self, topic: &str, queue_id: i32) -> Option<u64> {
        self.table.read().get(&(topic.to_string(), queue_id)).map(|e| e.min)
    }

    pub fn max_offset(&self, topic: &str, queue_id: i32) -> Option<u64> {
        self.table
            .read()
            .get(&(topic.to_string(), queue_id))
            .map(|e| e.next.saturating_sub(1))
    }

    /// Used by recovery to reset a queue's counters to a known-durable
    /// point when truncating the log past a corrupt tail (§4.5).
    pub fn reset(&self, topic: &str, queue_id: i32, next_offset: u64) {
        let mut table = self.table.write();
        table.insert((topic.to_string(), queue_id), QueueOffsets { next: next_offset, min: 0 });
    }
}
