// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use super::event_queue::{EventQueue, ExecutionDemand};
use super::queue_lock::QueueLockFactory;

/// Result of a blocking pop.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PopResult {
    /// At least one demand was moved into the output buffer.
    Demands,
    /// The queue was shut down; the worker must exit.
    Shutdown,
}

/// FIFO of execution demands with one consumer thread.
///
/// The consumer waits in two stages per the configured lock factory:
/// a busy-wait window of lock/probe/yield cycles, then a condition
/// variable. Producers only pay a notify when the queue was empty.
pub(crate) struct MpscDemandQueue {
    inner: Mutex<VecDeque<ExecutionDemand>>,
    not_empty: Condvar,
    shutdown: AtomicBool,
    busy_wait: Option<Duration>,
}

impl MpscDemandQueue {
    pub(crate) fn new(lock_factory: QueueLockFactory) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            shutdown: AtomicBool::new(false),
            busy_wait: lock_factory.busy_wait(),
        }
    }

    pub(crate) fn push_demand(&self, demand: ExecutionDemand) {
        let mut queue = self.inner.lock();
        let was_empty = queue.is_empty();
        queue.push_back(demand);
        if was_empty {
            self.not_empty.notify_one();
        }
    }

    /// Move up to `max` demands into `out`, blocking while the queue is
    /// empty.
    pub(crate) fn pop_batch(&self, max: usize, out: &mut Vec<ExecutionDemand>) -> PopResult {
        let spin_deadline = self.busy_wait.map(|w| Instant::now() + w);
        loop {
            let mut queue = self.inner.lock();
            loop {
                if !queue.is_empty() {
                    for _ in 0..max {
                        match queue.pop_front() {
                            Some(demand) => out.push(demand),
                            None => break,
                        }
                    }
                    return PopResult::Demands;
                }
                if self.shutdown.load(Ordering::Acquire) {
                    return PopResult::Shutdown;
                }
                match spin_deadline {
                    Some(deadline) if Instant::now() < deadline => break,
                    _ => {
                        self.not_empty.wait(&mut queue);
                    }
                }
            }
            drop(queue);
            std::thread::yield_now();
        }
    }

    /// Wake the consumer and make it exit. Demands still queued are
    /// dropped (releasing their limit slots).
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut queue = self.inner.lock();
        queue.clear();
        self.not_empty.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl EventQueue for MpscDemandQueue {
    fn push(&self, demand: ExecutionDemand) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        self.push_demand(demand);
    }
}
