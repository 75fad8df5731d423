//! Deferred disposal pool.
//!
//! Tearing down a sorted set with many members walks and frees every node,
//! which is too slow to do on the reactor thread. Such sets are handed to a
//! small pool of OS threads instead. The reactor only ever pushes onto the
//! queue; the workers never see the live indexes.
//!
//! Plain `std::thread`s are used because the work is CPU-bound and the
//! reactor itself is not async.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, warn};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    not_empty: Condvar,
}

impl Shared {
    // A job that panicked must not wedge the pool.
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size pool of threads draining a FIFO job queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `threads` workers. Threads that fail to spawn are logged and
    /// skipped; with no workers at all, jobs run inline in `submit`.
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(Shared::default());
        let mut workers = Vec::with_capacity(threads);

        for i in 0..threads {
            let shared = Arc::clone(&shared);
            match std::thread::Builder::new()
                .name(format!("quillkv-dispose-{i}"))
                .spawn(move || worker_loop(&shared))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!("failed to spawn dispose worker {i}: {e}"),
            }
        }

        debug!(threads = workers.len(), "dispose pool started");
        Self { shared, workers }
    }

    /// Number of running worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job` for a worker. Never blocks on the job itself.
    pub fn submit(&self, job: Job) {
        if self.workers.is_empty() {
            job();
            return;
        }
        self.shared.lock().jobs.push_back(job);
        self.shared.not_empty.notify_one();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut queue = shared.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared
                    .not_empty
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!("dispose job panicked");
        }
    }
}

impl Drop for WorkerPool {
    /// Lets the workers finish everything already queued, then joins them.
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.not_empty.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("dispose worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_on_workers() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.threads(), 2);

        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || {
            let name = std::thread::current().name().map(str::to_owned);
            tx.send(name).unwrap();
        }));

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("quillkv-dispose-"));
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3);
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_zero_threads_runs_inline() {
        let pool = WorkerPool::new(0);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_job_does_not_stop_pool() {
        let pool = WorkerPool::new(1);
        pool.submit(Box::new(|| panic!("boom")));

        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(pool.threads(), 1);
    }
}
