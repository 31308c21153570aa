//! Commit Service (§4.6): moves bytes out of the transient off-heap buffer
//! pool and into the segment's own mapping. Only runs when
//! `Options::use_transient_pool` is set — a plain mmap-backed append has no
//! transient buffer to drain, so there is nothing for this service to do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{Committer, PAGE_SIZE};

struct Shared {
    wake: Condvar,
    lock: Mutex<()>,
    running: AtomicBool,
}

pub struct CommitService {
    shared: Arc<Shared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CommitService {
    pub fn start<C: Committer + 'static>(committer: Arc<C>, commit_interval: Duration, commit_least_pages: u32) -> Self {
        let shared = Arc::new(Shared {
            wake: Condvar::new(),
            lock: Mutex::new(()),
            running: AtomicBool::new(true),
        });
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("commitlog-commit".into())
            .spawn(move || Self::run(worker, committer, commit_interval, commit_least_pages))
            .expect("spawn commit thread");
        CommitService {
            shared,
            handle: Some(handle),
        }
    }

    fn run<C: Committer>(shared: Arc<Shared>, committer: Arc<C>, commit_interval: Duration, commit_least_pages: u32) {
        while shared.running.load(Ordering::Acquire) {
            {
                let mut guard = shared.lock.lock();
                shared.wake.wait_for(&mut guard, commit_interval);
            }
            if !shared.running.load(Ordering::Acquire) {
                break;
            }

            let dirty = committer.write_offset().saturating_sub(committer.committed_offset());
            if dirty / PAGE_SIZE >= commit_least_pages as u64 {
                if let Err(err) = committer.commit() {
                    panic!("commit service failed: {err}");
                }
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

impl Drop for CommitService {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake.notify_all();
    }
}
