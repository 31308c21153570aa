//! StoreCheckpoint (§3, §4.5): the small on-disk record that tells recovery
//! where to start scanning instead of replaying the whole log.

use std::sync::atomic::{AtomicI64, Ordering};

/// Recovery start hints, updated as the log advances and consulted only at
/// startup. All three track "earliest point we can still trust", not
/// "latest write" — recovery scans forward from the minimum of these.
#[derive(Debug, Default)]
pub struct StoreCheckpoint {
    min_timestamp_index: AtomicI64,
    min_timestamp: AtomicI64,
    physic_msg_timestamp: AtomicI64,
}

impl StoreCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_timestamp_index(&self) -> i64 {
        self.min_timestamp_index.load(Ordering::Acquire)
    }

    pub fn set_min_timestamp_index(&self, value: i64) {
        self.min_timestamp_index.store(value, Ordering::Release);
    }

    pub fn min_timestamp(&self) -> i64 {
        self.min_timestamp.load(Ordering::Acquire)
    }

    pub fn set_min_timestamp(&self, value: i64) {
        self.min_timestamp.store(value, Ordering::Release);
    }

    pub fn physic_msg_timestamp(&self) -> i64 {
        self.physic_msg_timestamp.load(Ordering::Acquire)
    }

    pub fn set_physic_msg_timestamp(&self, value: i64) {
        self.physic_msg_timestamp.store(value, Ordering::Release);
    }

    /// The timestamp recovery should treat as "scan from here", per §4.5:
    /// the earliest of the three checkpoints, so a stale consumer-queue
    /// index doesn't get skipped over.
    pub fn recovery_start_timestamp(&self) -> i64 {
        self.min_timestamp_index().min(self.min_timestamp()).min(self.physic_msg_timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_start_is_the_minimum() {
        let cp = StoreCheckpoint::new();
        cp.set_min_timestamp_index(300);
        cp.set_min_timestamp(100);
        cp.set_physic_msg_timestamp(200);
        assert_eq!(cp.recovery_start_timestamp(), 100);
    }
}
