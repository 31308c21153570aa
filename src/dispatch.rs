//! External collaborator interfaces (§6): consumer-queue indexing and
//! scheduled-message delivery are out of scope for this crate, but the
//! Append Engine and Recovery Engine both need a contract to call into them
//! through.

use std::io;

use crate::record::{DelayScheduler, Record};

/// Notified once per durably-framed record, after append (live traffic) or
/// during a recovery scan (startup). Never called for BLANK trailers, and
/// never called for a record whose transaction state is
/// `Prepared`/`Rollback` (§3 I2) — those aren't visible to consumers yet.
pub trait DispatchSink: Send + Sync {
    fn dispatch(&self, record: &Record, physical_offset: u64, tags_code: i64) -> io::Result<()>;
}

/// A `DispatchSink` that does nothing, for tests and for a store that hasn't
/// wired up consumer-queue rebuild yet.
pub struct NullDispatchSink;

impl DispatchSink for NullDispatchSink {
    fn dispatch(&self, _record: &Record, _physical_offset: u64, _tags_code: i64) -> io::Result<()> {
        Ok(())
    }
}

/// Delay-queue bookkeeping for `SCHEDULE_TOPIC` messages (§4.1, §6).
pub trait ScheduleService: DelayScheduler {
    /// The synthetic queue id a given delay level is stored under within
    /// `SCHEDULE_TOPIC`.
    fn delay_level_to_queue_id(&self, level: u8) -> i32;
}

/// RocketMQ's stock delay-level table: 18 levels from 1s up to 2h. Provided
/// as a ready default so the crate is exercisable without a broker's full
/// scheduling subsystem; a real deployment is expected to supply its own
/// `ScheduleService`.
pub struct DefaultScheduleService {
    levels_ms: Vec<i64>,
}

impl Default for DefaultScheduleService {
    fn default() -> Self {
        let seconds = [1, 5, 10, 30, 60, 120, 180, 240, 300, 360, 420, 480, 540, 600, 1200, 1800, 3600, 7200];
        DefaultScheduleService {
            levels_ms: seconds.iter().map(|s| s * 1000).collect(),
        }
    }
}

impl DelayScheduler for DefaultScheduleService {
    fn max_delay_level(&self) -> u8 {
        self.levels_ms.len() as u8
    }

    fn deliver_timestamp(&self, level: u8, store_timestamp: i64) -> i64 {
        let idx = level.saturating_sub(1) as usize;
        let delay_ms = self.levels_ms.get(idx).copied().unwrap_or(0);
        store_timestamp + delay_ms
    }
}

impl ScheduleService for DefaultScheduleService {
    fn delay_level_to_queue_id(&self, level: u8) -> i32 {
        level.saturating_sub(1) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_clamps_unknown_levels() {
        let svc = DefaultScheduleService::default();
        assert_eq!(svc.max_delay_level(), 18);
        assert_eq!(svc.deliver_timestamp(1, 1_000), 1_000 + 1_000);
        assert_eq!(svc.deliver_timestamp(18, 0), 7_200_000);
    }
}
