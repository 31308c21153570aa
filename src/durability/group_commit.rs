//! Group-Commit Service (§4.4): coalesces synchronous flush waiters so N
//! producers blocked on `FLUSH_SYNC` cost one flush call, not N.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::durability::Flusher;
use crate::error::PutMessageStatus;

struct PendingRequest {
    next_offset: u64,
    result: Arc<(Mutex<Option<PutMessageStatus>>, Condvar)>,
}

struct Shared {
    pending: Mutex<Vec<PendingRequest>>,
    wake: Condvar,
    running: AtomicBool,
}

/// A background thread that wakes every `interval`, swaps out the pending
/// waiter list, issues a single flush, and resolves every waiter the flush
/// satisfied. Waiters the flush didn't reach (shouldn't normally happen,
/// since a flush always catches up to any offset submitted before the swap)
/// are put back for the next round rather than failed outright; each
/// waiter's own deadline, checked in `submit`, is what actually produces
/// `FLUSH_DISK_TIMEOUT`.
pub struct GroupCommitService {
    shared: Arc<Shared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl GroupCommitService {
    pub fn start<F: Flusher + 'static>(flusher: Arc<F>, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Vec::new()),
            wake: Condvar::new(),
            running: AtomicBool::new(true),
        });
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("commitlog-group-commit".into())
            .spawn(move || Self::run(worker, flusher, interval))
            .expect("spawn group commit thread");
        GroupCommitService {
            shared,
            handle: Some(handle),
        }
    }

    fn run<F: Flusher>(shared: Arc<Shared>, flusher: Arc<F>, interval: Duration) {
        while shared.running.load(Ordering::Acquire) {
            let batch = {
                let mut pending = shared.pending.lock();
                if pending.is_empty() {
                    shared.wake.wait_for(&mut pending, interval);
                }
                std::mem::take(&mut *pending)
            };
            if batch.is_empty() {
                continue;
            }

            if let Err(err) = flusher.flush() {
                // An fsync failure leaves on-disk state undefined; there is
                // no safe way to keep appending. See error.rs.
                panic!("group commit flush failed: {err}");
            }
            let flushed = flusher.flushed_offset();

            let mut requeue = Vec::new();
            for req in batch {
                if flushed >= req.next_offset {
                    let (lock, cv) = &*req.result;
                    *lock.lock() = Some(PutMessageStatus::PutOk);
                    cv.notify_all();
                } else {
                    requeue.push(req);
                }
            }
            if !requeue.is_empty() {
                shared.pending.lock().extend(requeue);
            }
        }
    }

    /// Block the calling (producer) thread until `next_offset` is flushed
    /// or `timeout` elapses.
    pub fn submit(&self, next_offset: u64, timeout: Duration) -> PutMessageStatus {
        let result = Arc::new((Mutex::new(None), Condvar::new()));
        {
            let mut pending = self.shared.pending.lock();
            pending.push(PendingRequest {
                next_offset,
                result: result.clone(),
            });
        }
        self.shared.wake.notify_one();

        let (lock, cv) = &*result;
        let mut guard = lock.lock();
        let deadline = Instant::now() + timeout;
        while guard.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PutMessageStatus::FlushDiskTimeout;
            }
            cv.wait_for(&mut guard, remaining);
        }
        guard.take().expect("resolved waiter always carries a status")
    }

    pub fn shutdown(mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GroupCommitService {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FakeFlusher {
        flushed: AtomicU64,
        write: AtomicU64,
    }

    impl Flusher for FakeFlusher {
        fn flush(&self) -> std::io::Result<()> {
            self.flushed.store(self.write.load(Ordering::Acquire), Ordering::Release);
            Ok(())
        }
        fn flushed_offset(&self) -> u64 {
            self.flushed.load(Ordering::Acquire)
        }
        fn write_offset(&self) -> u64 {
            self.write.load(Ordering::Acquire)
        }
    }

    #[test]
    fn waiter_is_resolved_once_flushed() {
        let flusher = Arc::new(FakeFlusher {
            flushed: AtomicU64::new(0),
            write: AtomicU64::new(100),
        });
        let service = GroupCommitService::start(flusher, Duration::from_millis(5));
        let status = service.submit(100, Duration::from_secs(1));
        assert_eq!(status, PutMessageStatus::PutOk);
        service.shutdown();
    }

    #[test]
    fn waiter_times_out_if_never_flushed() {
        let flusher = Arc::new(FakeFlusher {
            flushed: AtomicU64::new(0),
            write: AtomicU64::new(0),
        });
        let service = GroupCommitService::start(flusher, Duration::from_millis(5));
        let status = service.submit(100, Duration::from_millis(30));
        assert_eq!(status, PutMessageStatus::FlushDiskTimeout);
        service.shutdown();
    }

    #[test]
    fn many_waiters_share_one_flush() {
        let flush_calls = Arc::new(AtomicU64::new(0));
        struct CountingFlusher {
            calls: Arc<AtomicU64>,
            flushed: AtomicU64,
        }
        impl Flusher for CountingFlusher {
            fn flush(&self) -> std::io::Result<()> {
                self.calls.fetch_add(1, Ordering::AcqRel);
                self.flushed.store(1_000, Ordering::Release);
                Ok(())
            }
            fn flushed_offset(&self) -> u64 {
                self.flushed.load(Ordering::Acquire)
            }
            fn write_offset(&self) -> u64 {
                1_000
            }
        }
        let flusher = Arc::new(CountingFlusher {
            calls: flush_calls.clone(),
            flushed: AtomicU64::new(0),
        });
        let service = Arc::new(GroupCommitService::start(flusher, Duration::from_millis(20)));

        let mut handles = Vec::new();
        for offset in 1..=10u64 {
            let service = service.clone();
            handles.push(thread::spawn(move || service.submit(offset, Duration::from_secs(1))));
        }
        for h in handles {
            assert_eq!(h.join().unwrap(), PutMessageStatus::PutOk);
        }
        assert!(flush_calls.load(Ordering::Acquire) <= 10);
    }
}
