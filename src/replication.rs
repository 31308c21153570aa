//! Replication Bridge (§4.7, §6): the thin layer between the Append Engine
//! and the HA transport that ships bytes to slaves. The transport itself
//! (`HaService`) is an external collaborator; this module owns only the
//! broker-role decision of whether/how long to wait for slave
//! acknowledgement before answering a synchronous producer.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::BrokerRole;
use crate::error::PutMessageStatus;

/// Transport to the replica set. A real implementation streams newly
/// appended bytes over a socket and tracks each slave's acknowledged
/// offset; out of scope here per §1, but the bridge below is fully
/// exercisable against any implementation, including the in-memory one used
/// in tests.
pub trait HaService: Send + Sync {
    fn push(&self, physical_offset: u64, bytes: &[u8]) -> io::Result<()>;
    /// Highest physical offset acknowledged by the slave(s) this store
    /// needs for `FLUSH_SLAVE_TIMEOUT`/`SLAVE_NOT_AVAILABLE` decisions.
    fn acked_offset(&self) -> u64;
    /// Whether at least one slave is connected and within the broker's
    /// staleness tolerance (§4.7 `SLAVE_NOT_AVAILABLE`).
    fn slave_ok(&self) -> bool;
}

/// An `HaService` with no replicas: `push` is a no-op, acknowledgement is
/// immediate. Used for a lone `AsyncMaster`/standalone store in tests.
pub struct NoReplication;

impl HaService for NoReplication {
    fn push(&self, _physical_offset: u64, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn acked_offset(&self) -> u64 {
        u64::MAX
    }

    fn slave_ok(&self) -> bool {
        true
    }
}

pub struct ReplicationBridge<H> {
    role: BrokerRole,
    ha: H,
    poll_interval: Duration,
}

impl<H: HaService> ReplicationBridge<H> {
    pub fn new(role: BrokerRole, ha: H) -> Self {
        ReplicationBridge {
            role,
            ha,
            poll_interval: Duration::from_millis(1),
        }
    }

    pub fn role(&self) -> BrokerRole {
        self.role
    }

    pub fn push(&self, physical_offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.ha.push(physical_offset, bytes)
    }

    /// Block the producer until `next_offset` is acknowledged or `timeout`
    /// elapses, only when `role` is `SyncMaster` (§4.7). Any other role is
    /// fire-and-forget and always reports success immediately.
    pub fn wait_for_ack(&self, next_offset: u64, timeout: Duration) -> PutMessageStatus {
        if self.role != BrokerRole::SyncMaster {
            return PutMessageStatus::PutOk;
        }
        if !self.ha.slave_ok() {
            return PutMessageStatus::SlaveNotAvailable;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.ha.acked_offset() >= next_offset {
                return PutMessageStatus::PutOk;
            }
            if Instant::now() >= deadline {
                return PutMessageStatus::FlushSlaveTimeout;
            }
            thread::sleep(self.poll_interval);
        }
    }
}
