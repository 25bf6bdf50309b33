//! Fixed-size worker pool for the repoline status engine.
//!
//! One pool is created per process, before any engine, and outlives every
//! engine that borrows it. The pool is deliberately minimal: a fixed number
//! of OS threads draining a FIFO queue of boxed closures. There is no work
//! stealing, no priorities, and no async — status scans are short,
//! CPU-and-syscall-bound bursts, and submission order is the only fairness
//! the engine needs.
//!
//! # Thread model
//!
//! Coordination uses [`std::sync::Mutex`] + [`std::sync::Condvar`]. Worker
//! threads block in [`Condvar::wait`] while the queue is empty; `schedule`
//! pushes and wakes one worker. Dropping the pool flips a shutdown latch,
//! wakes everyone, and joins: queued jobs still run, new submissions are
//! refused with [`PoolClosed`].
//!
//! # Test hook
//!
//! [`ThreadPool::scheduled_count`] counts every accepted submission. Callers
//! that must prove a fast path spawned no work (for example, a repeated
//! status query answered entirely from known files) snapshot the counter
//! before and after.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error returned by [`ThreadPool::schedule`] once the pool has shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool is shut down; no further tasks are accepted")]
pub struct PoolClosed;

struct PoolState {
    queue: VecDeque<Job>,
    shutdown: bool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    notify: Condvar,
    scheduled: AtomicU64,
}

/// A fixed-size FIFO worker pool.
///
/// ```
/// use repoline_pool::ThreadPool;
/// use std::sync::mpsc;
///
/// let pool = ThreadPool::new(2);
/// let (tx, rx) = mpsc::channel();
/// pool.schedule(move || tx.send(21 + 21).unwrap()).unwrap();
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl ThreadPool {
    /// Spawn a pool with exactly `num_threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is zero: a zero-width pool would accept jobs
    /// that can never run.
    #[must_use]
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads > 0, "thread pool requires at least one worker");
        debug!(target: "repoline.pool", num_threads, "spawning worker pool");

        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            notify: Condvar::new(),
            scheduled: AtomicU64::new(0),
        });

        let workers = (0..num_threads)
            .map(|id| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("repoline-worker-{id}"))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn pool worker")
            })
            .collect();

        Self {
            inner,
            workers: Mutex::new(workers),
            num_threads,
        }
    }

    /// Number of worker threads, fixed at construction.
    #[must_use]
    pub const fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Total submissions accepted so far.
    #[must_use]
    pub fn scheduled_count(&self) -> u64 {
        self.inner.scheduled.load(Ordering::Relaxed)
    }

    /// Enqueue a closure for execution on some worker, FIFO.
    ///
    /// # Errors
    ///
    /// Returns [`PoolClosed`] if [`shutdown`](Self::shutdown) has run; the
    /// closure is dropped without executing.
    pub fn schedule<F>(&self, job: F) -> Result<(), PoolClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock().expect("pool lock poisoned");
            if state.shutdown {
                return Err(PoolClosed);
            }
            state.queue.push_back(Box::new(job));
        }
        self.inner.scheduled.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Refuse further submissions and let workers drain the queue.
    ///
    /// Idempotent. Already-queued jobs still run; [`Drop`] joins the
    /// workers after calling this.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        if !state.shutdown {
            state.shutdown = true;
            debug!(target: "repoline.pool", pending = state.queue.len(), "pool shutdown requested");
        }
        drop(state);
        self.inner.notify.notify_all();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
        let workers = std::mem::take(&mut *self.workers.lock().expect("pool lock poisoned"));
        for handle in workers {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    let mut state = inner.state.lock().expect("pool lock poisoned");
    loop {
        if let Some(job) = state.queue.pop_front() {
            drop(state);
            // A panicking job must not take the worker thread with it;
            // later submissions still have to run.
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                warn!(target: "repoline.pool", "pool job panicked; worker continues");
            }
            state = inner.state.lock().expect("pool lock poisoned");
        } else if state.shutdown {
            return;
        } else {
            state = inner.notify.wait(state).expect("pool lock poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = ThreadPool::new(2);
        let (tx, rx) = mpsc::channel();
        for i in 0..8 {
            let tx = tx.clone();
            pool.schedule(move || tx.send(i).unwrap()).unwrap();
        }
        let mut seen: Vec<i32> = (0..8).map(|_| rx.recv().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let pool = ThreadPool::new(1);
        let (tx, rx) = mpsc::channel();
        for i in 0..16 {
            let tx = tx.clone();
            pool.schedule(move || tx.send(i).unwrap()).unwrap();
        }
        let seen: Vec<i32> = (0..16).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn reports_thread_count() {
        let pool = ThreadPool::new(3);
        assert_eq!(pool.num_threads(), 3);
    }

    #[test]
    fn scheduled_count_tracks_submissions() {
        let pool = ThreadPool::new(1);
        assert_eq!(pool.scheduled_count(), 0);
        pool.schedule(|| {}).unwrap();
        pool.schedule(|| {}).unwrap();
        assert_eq!(pool.scheduled_count(), 2);
    }

    #[test]
    fn schedule_after_shutdown_fails() {
        let pool = ThreadPool::new(1);
        pool.shutdown();
        assert_eq!(pool.schedule(|| {}), Err(PoolClosed));
        assert_eq!(pool.scheduled_count(), 0);
    }

    #[test]
    fn drop_drains_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(2);
            for _ in 0..32 {
                let counter = Arc::clone(&counter);
                pool.schedule(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let pool = ThreadPool::new(1);
        pool.schedule(|| panic!("boom")).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.schedule(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    #[should_panic(expected = "at least one worker")]
    fn zero_workers_is_rejected() {
        let _ = ThreadPool::new(0);
    }
}
