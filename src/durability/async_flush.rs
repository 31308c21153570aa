//! Async Flush Service (§4.4): background, best-effort `fsync` cadence for
//! producers that didn't ask for `FLUSH_SYNC`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{Flusher, PAGE_SIZE};

struct Shared {
    wake: Condvar,
    lock: Mutex<()>,
    running: AtomicBool,
}

/// Wakes every `flush_interval`. Flushes when either `flush_least_pages`
/// dirty pages have accumulated, or `flush_thorough_interval` has elapsed
/// since the last forced flush, whichever comes first — mirroring RocketMQ's
/// `CommitLog$FlushRealTimeService` "thorough" escape hatch so a quiet log
/// still gets flushed instead of waiting forever for enough dirty pages.
pub struct AsyncFlushService {
    shared: Arc<Shared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AsyncFlushService {
    pub fn start<F: Flusher + 'static>(
        flusher: Arc<F>,
        flush_interval: Duration,
        flush_least_pages: u32,
        flush_thorough_interval: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            wake: Condvar::new(),
            lock: Mutex::new(()),
            running: AtomicBool::new(true),
        });
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("commitlog-async-flush".into())
            .spawn(move || Self::run(worker, flusher, flush_interval, flush_least_pages, flush_thorough_interval))
            .expect("spawn async flush thread");
        AsyncFlushService {
            shared,
            handle: Some(handle),
        }
    }

    fn run<F: Flusher>(
        shared: Arc<Shared>,
        flusher: Arc<F>,
        flush_interval: Duration,
        flush_least_pages: u32,
        flush_thorough_interval: Duration,
    ) {
        let mut last_forced = Instant::now();
        while shared.running.load(Ordering::Acquire) {
            {
                let mut guard = shared.lock.lock();
                shared.wake.wait_for(&mut guard, flush_interval);
            }
            if !shared.running.load(Ordering::Acquire) {
                break;
            }

            let dirty = flusher.write_offset().saturating_sub(flusher.flushed_offset());
            let dirty_pages = dirty / PAGE_SIZE;
            let thorough_due = last_forced.elapsed() >= flush_thorough_interval;

            if dirty_pages >= flush_least_pages as u64 || thorough_due {
                if let Err(err) = flusher.flush() {
                    panic!("async flush failed: {err}");
                }
                last_forced = Instant::now();
            }
        }
    }

    pub fn shutdown(mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AsyncFlushService {
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
    fn thorough_interval_forces_flush_without_enough_pages() {
        let flusher = Arc::new(FakeFlusher {
            flushed: AtomicU64::new(0),
            write: AtomicU64::new(100),
        });
        let service = AsyncFlushService::start(
            flusher.clone(),
            Duration::from_millis(5),
            1_000_000,
            Duration::from_millis(15),
        );
        thread::sleep(Duration::from_millis(60));
        service.shutdown();
        assert_eq!(flusher.flushed_offset(), 100);
    }

    #[test]
    fn enough_dirty_pages_forces_flush_before_thorough_interval() {
        let flusher = Arc::new(FakeFlusher {
            flushed: AtomicU64::new(0),
            write: AtomicU64::new(PAGE_SIZE * 10),
        });
        let service = AsyncFlushService::start(flusher.clone(), Duration::from_millis(5), 4, Duration::from_secs(60));
        thread::sleep(Duration::from_millis(30));
        service.shutdown();
        assert_eq!(flusher.flushed_offset(), PAGE_SIZE * 10);
    }
}
