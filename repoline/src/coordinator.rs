//! Inflight-task coordination for one status query.
//!
//! The aggregator thread parks on a condition variable until one of three
//! things holds: every worker task drained, the per-query error latch was
//! set, or the query's done-predicate (all needed slots filled) became
//! true. Workers read the counter and latch with relaxed atomics; every
//! publication that must produce a wakeup — a slot fill, the latch, a
//! decrement near the waiter's threshold — goes through the mutex first so
//! the wakeup cannot be lost.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use tracing::debug;

use crate::slot::FileSlot;

/// The aggregator only ever waits for the counter to reach 0 (query drain,
/// destructor) or 1 (a background reshard waiting out everything but
/// itself). Decrements close to that threshold wake the waiter.
pub(crate) const MAX_WAIT_INFLIGHT: usize = 1;

#[derive(Debug, Default)]
pub(crate) struct Coordinator {
    inflight: AtomicUsize,
    error: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Coordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    pub(crate) fn has_error(&self) -> bool {
        self.error.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_error(&self) {
        self.error.store(false, Ordering::Relaxed);
    }

    /// Account for a task about to be submitted. Must strictly precede the
    /// enqueue; the matching [`finish_task`](Self::finish_task) runs
    /// unconditionally when the task ends, successfully or not.
    pub(crate) fn begin_task(&self) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finish_task(&self) {
        let _guard = self.lock.lock().expect("coordinator lock poisoned");
        let previous = self.inflight.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "inflight underflow");
        if previous <= MAX_WAIT_INFLIGHT + 1 {
            self.cond.notify_all();
        }
    }

    /// Latch the per-query error flag, once, and wake the aggregator.
    /// Called before the task's decrement so a drained counter is never
    /// observed ahead of the latch.
    pub(crate) fn flag_error(&self) {
        if !self.error.load(Ordering::Relaxed) {
            let _guard = self.lock.lock().expect("coordinator lock poisoned");
            if !self.error.load(Ordering::Relaxed) {
                self.error.store(true, Ordering::Relaxed);
                debug!(target: "repoline.engine", "scan error latched");
                self.cond.notify_all();
            }
        }
    }

    /// Publish `path` into `slot` if it is still empty, waking the
    /// aggregator on success.
    pub(crate) fn publish(&self, slot: &FileSlot, label: &'static str, path: &str) {
        if !slot.is_empty() {
            return;
        }
        let _guard = self.lock.lock().expect("coordinator lock poisoned");
        if slot.try_set(path) {
            debug!(target: "repoline.engine", kind = label, path, "found file");
            self.cond.notify_all();
        }
    }

    /// Block until exactly `target` tasks remain inflight.
    pub(crate) fn wait(&self, target: usize) {
        debug_assert!(target <= MAX_WAIT_INFLIGHT);
        let mut guard = self.lock.lock().expect("coordinator lock poisoned");
        while self.inflight.load(Ordering::Relaxed) != target {
            debug_assert!(self.inflight.load(Ordering::Relaxed) > target);
            guard = self.cond.wait(guard).expect("coordinator lock poisoned");
        }
    }

    /// Block until the query can be answered: all tasks drained, the error
    /// latch set, or `done` returning true.
    pub(crate) fn wait_scan(&self, done: impl Fn() -> bool) {
        let mut guard = self.lock.lock().expect("coordinator lock poisoned");
        while self.inflight.load(Ordering::Relaxed) != 0
            && !self.error.load(Ordering::Relaxed)
            && !done()
        {
            guard = self.cond.wait(guard).expect("coordinator lock poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_zero_returns_immediately_when_idle() {
        let coord = Coordinator::new();
        coord.wait(0);
    }

    #[test]
    fn wait_blocks_until_tasks_finish() {
        let coord = Arc::new(Coordinator::new());
        for _ in 0..4 {
            coord.begin_task();
        }
        let worker = {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || {
                for _ in 0..4 {
                    std::thread::sleep(Duration::from_millis(5));
                    coord.finish_task();
                }
            })
        };
        coord.wait(0);
        assert_eq!(coord.inflight(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn wait_one_leaves_the_last_task_running() {
        let coord = Arc::new(Coordinator::new());
        coord.begin_task();
        coord.begin_task();
        let worker = {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || coord.finish_task())
        };
        coord.wait(1);
        assert_eq!(coord.inflight(), 1);
        worker.join().unwrap();
        coord.finish_task();
    }

    #[test]
    fn error_latch_wakes_scan_wait() {
        let coord = Arc::new(Coordinator::new());
        coord.begin_task();
        let worker = {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || {
                coord.flag_error();
                coord.finish_task();
            })
        };
        coord.wait_scan(|| false);
        assert!(coord.has_error());
        worker.join().unwrap();
        coord.clear_error();
        assert!(!coord.has_error());
    }

    #[test]
    fn slot_publication_wakes_scan_wait() {
        let coord = Arc::new(Coordinator::new());
        let slot = Arc::new(FileSlot::new());
        coord.begin_task();
        let worker = {
            let coord = Arc::clone(&coord);
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                coord.publish(&slot, "staged", "README");
                std::thread::sleep(Duration::from_millis(20));
                coord.finish_task();
            })
        };
        let done_slot = Arc::clone(&slot);
        coord.wait_scan(move || !done_slot.is_empty());
        assert_eq!(slot.get(), Some("README".to_owned()));
        worker.join().unwrap();
        coord.wait(0);
    }

    #[test]
    fn publish_into_filled_slot_is_a_no_op() {
        let coord = Coordinator::new();
        let slot = FileSlot::new();
        coord.publish(&slot, "staged", "first");
        coord.publish(&slot, "staged", "second");
        assert_eq!(slot.get(), Some("first".to_owned()));
    }
}
