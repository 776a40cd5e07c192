//! Priority-aware dispatchers.
//!
//! Agents carry a [`Priority`] (`p0`..`p7`, `p7` highest); these
//! dispatchers consult it when ordering demands:
//!
//! - [`StrictlyOrderedDispatcher`]: one thread, always serves the
//!   highest-priority pending demand.
//! - [`QuotedRoundRobinDispatcher`]: one thread, serves up to a quota
//!   of demands per priority, then moves to the next non-empty lower
//!   priority, wrapping back to the highest.
//! - [`OnePerPrioDispatcher`]: a dedicated thread per priority class,
//!   plain FIFO within a class.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use super::binder::{DispBinder, DispBinderRef, DispatcherError};
use super::demand_queue::MpscDemandQueue;
use super::event_queue::{EventQueue, EventQueueRef, ExecutionDemand};
use super::one_thread::DispatcherParams;
use super::work_thread::{ActivityTracker, WorkThread};
use crate::agent::runtime::AgentRuntime;
use crate::util::{Priority, PRIORITIES_COUNT};

type PrioQueues = [VecDeque<ExecutionDemand>; PRIORITIES_COUNT];

fn empty_queues() -> PrioQueues {
    std::array::from_fn(|_| VecDeque::new())
}

struct PrioCore {
    inner: Mutex<PrioQueues>,
    not_empty: Condvar,
    shutdown: AtomicBool,
}

impl PrioCore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(empty_queues()),
            not_empty: Condvar::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    fn push(&self, priority: Priority, demand: ExecutionDemand) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let mut queues = self.inner.lock();
        queues[priority.index()].push_back(demand);
        self.not_empty.notify_one();
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut queues = self.inner.lock();
        for queue in queues.iter_mut() {
            queue.clear();
        }
        self.not_empty.notify_all();
    }
}

/// Event queue facade binding one agent's priority to the shared
/// priority queues.
struct PrioEventQueue {
    core: Arc<PrioCore>,
    priority: Priority,
}

impl EventQueue for PrioEventQueue {
    fn push(&self, demand: ExecutionDemand) {
        self.core.push(self.priority, demand);
    }
}

struct PrioBinder {
    core: Arc<PrioCore>,
    // Keeps the owning dispatcher (and its worker thread) alive while
    // any cooperation is bound through this binder.
    owner: Arc<dyn std::any::Any + Send + Sync>,
}

impl DispBinder for PrioBinder {
    fn preallocate(&self, _agent: &Arc<AgentRuntime>) -> Result<(), DispatcherError> {
        if self.core.shutdown.load(Ordering::Acquire) {
            return Err(DispatcherError::DispatcherStopped);
        }
        Ok(())
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentRuntime>) {}

    fn bind(&self, agent: &Arc<AgentRuntime>) -> EventQueueRef {
        Arc::new(PrioEventQueue {
            core: Arc::clone(&self.core),
            priority: agent.priority(),
        })
    }

    fn unbind(&self, _agent: &Arc<AgentRuntime>) {}
}

fn join_worker(worker: &Mutex<Option<JoinHandle<()>>>) {
    if let Some(handle) = worker.lock().take() {
        let _ = handle.join();
    }
}

struct SingleWorkerCore {
    prio: Arc<PrioCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
    activity: Arc<ActivityTracker>,
}

impl SingleWorkerCore {
    fn stop(&self) {
        self.prio.stop();
        join_worker(&self.worker);
    }
}

impl Drop for SingleWorkerCore {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One thread; the highest-priority pending demand always runs first.
/// Lower priorities wait as long as higher ones have work.
///
/// The handle is cheap to clone; the worker thread is owned by the
/// shared core, which binders keep alive until their cooperations are
/// gone.
#[derive(Clone)]
pub struct StrictlyOrderedDispatcher {
    core: Arc<SingleWorkerCore>,
}

impl StrictlyOrderedDispatcher {
    pub fn new(params: DispatcherParams) -> Result<Self, DispatcherError> {
        let prio = PrioCore::new();
        let activity = ActivityTracker::new(params.activity_tracking);
        let worker_core = Arc::clone(&prio);
        let worker_activity = Arc::clone(&activity);
        let handle = std::thread::Builder::new()
            .name(params.thread_name)
            .spawn(move || strictly_ordered_loop(&worker_core, &worker_activity))?;
        Ok(Self {
            core: Arc::new(SingleWorkerCore {
                prio,
                worker: Mutex::new(Some(handle)),
                activity,
            }),
        })
    }

    /// A binder attaching agents to this dispatcher.
    pub fn binder(&self) -> DispBinderRef {
        Arc::new(PrioBinder {
            core: Arc::clone(&self.core.prio),
            owner: Arc::clone(&self.core) as Arc<dyn std::any::Any + Send + Sync>,
        })
    }

    /// Worker activity tracker.
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.core.activity
    }

    /// Stop the worker thread.
    pub fn stop(&self) {
        self.core.stop();
    }
}

fn strictly_ordered_loop(core: &Arc<PrioCore>, activity: &Arc<ActivityTracker>) {
    loop {
        let demand = {
            let mut queues = core.inner.lock();
            loop {
                let next = (0..PRIORITIES_COUNT)
                    .rev()
                    .find_map(|p| queues[p].pop_front());
                if let Some(demand) = next {
                    break demand;
                }
                if core.shutdown.load(Ordering::Acquire) {
                    return;
                }
                core.not_empty.wait(&mut queues);
            }
        };
        let started = std::time::Instant::now();
        demand.execute();
        activity.record_working(started.elapsed());
    }
}

/// Parameters of [`QuotedRoundRobinDispatcher`]: the per-priority
/// demand quotas.
#[derive(Debug, Clone)]
pub struct QrrParams {
    /// Base dispatcher parameters.
    pub dispatcher: DispatcherParams,
    quotes: [usize; PRIORITIES_COUNT],
}

impl QrrParams {
    /// Same quota for every priority.
    pub fn new(default_quote: usize) -> Self {
        Self {
            dispatcher: DispatcherParams::default().named("qrr"),
            quotes: [default_quote.max(1); PRIORITIES_COUNT],
        }
    }

    /// Override the quota of one priority.
    pub fn set_quote(mut self, priority: Priority, quote: usize) -> Self {
        self.quotes[priority.index()] = quote.max(1);
        self
    }

    /// Quota of one priority.
    pub fn quote(&self, priority: Priority) -> usize {
        self.quotes[priority.index()]
    }
}

/// One thread; each priority is served up to its quota of consecutive
/// demands, then the scheduler moves to the next non-empty lower
/// priority and wraps back to the highest after the lowest.
///
/// The handle is cheap to clone; the worker thread is owned by the
/// shared core, which binders keep alive until their cooperations are
/// gone.
#[derive(Clone)]
pub struct QuotedRoundRobinDispatcher {
    core: Arc<SingleWorkerCore>,
}

impl QuotedRoundRobinDispatcher {
    pub fn new(params: QrrParams) -> Result<Self, DispatcherError> {
        let prio = PrioCore::new();
        let activity = ActivityTracker::new(params.dispatcher.activity_tracking);
        let worker_core = Arc::clone(&prio);
        let worker_activity = Arc::clone(&activity);
        let quotes = params.quotes;
        let handle = std::thread::Builder::new()
            .name(params.dispatcher.thread_name)
            .spawn(move || quoted_round_robin_loop(&worker_core, &worker_activity, &quotes))?;
        Ok(Self {
            core: Arc::new(SingleWorkerCore {
                prio,
                worker: Mutex::new(Some(handle)),
                activity,
            }),
        })
    }

    /// A binder attaching agents to this dispatcher.
    pub fn binder(&self) -> DispBinderRef {
        Arc::new(PrioBinder {
            core: Arc::clone(&self.core.prio),
            owner: Arc::clone(&self.core) as Arc<dyn std::any::Any + Send + Sync>,
        })
    }

    /// Worker activity tracker.
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.core.activity
    }

    /// Stop the worker thread.
    pub fn stop(&self) {
        self.core.stop();
    }
}

fn quoted_round_robin_loop(
    core: &Arc<PrioCore>,
    activity: &Arc<ActivityTracker>,
    quotes: &[usize; PRIORITIES_COUNT],
) {
    // The cycle starts at the highest priority; exhausting a quota (or
    // finding a priority empty) moves to the next lower one, p0 wraps
    // to p7.
    let mut current = PRIORITIES_COUNT - 1;
    let mut served = 0usize;
    loop {
        let demand = {
            let mut queues = core.inner.lock();
            loop {
                let mut found = None;
                for _ in 0..PRIORITIES_COUNT {
                    if served < quotes[current] && !queues[current].is_empty() {
                        found = queues[current].pop_front();
                        served += 1;
                        break;
                    }
                    current = if current == 0 {
                        PRIORITIES_COUNT - 1
                    } else {
                        current - 1
                    };
                    served = 0;
                }
                if let Some(demand) = found {
                    break demand;
                }
                if core.shutdown.load(Ordering::Acquire) {
                    return;
                }
                core.not_empty.wait(&mut queues);
            }
        };
        let started = std::time::Instant::now();
        demand.execute();
        activity.record_working(started.elapsed());
    }
}

/// One worker thread per priority class; within a class, plain FIFO.
pub struct OnePerPrioDispatcher {
    queues: [Arc<MpscDemandQueue>; PRIORITIES_COUNT],
    workers: Mutex<Vec<WorkThread>>,
    activity: Arc<ActivityTracker>,
    stopped: AtomicBool,
}

impl OnePerPrioDispatcher {
    pub fn new(params: DispatcherParams) -> Result<Arc<Self>, DispatcherError> {
        let activity = ActivityTracker::new(params.activity_tracking);
        let queues: [Arc<MpscDemandQueue>; PRIORITIES_COUNT] =
            std::array::from_fn(|_| Arc::new(MpscDemandQueue::new(params.lock_factory)));
        let mut workers = Vec::with_capacity(PRIORITIES_COUNT);
        for (i, queue) in queues.iter().enumerate() {
            workers.push(WorkThread::start(
                format!("{}:p{}", params.thread_name, i),
                Arc::clone(queue),
                Arc::clone(&activity),
            )?);
        }
        Ok(Arc::new(Self {
            queues,
            workers: Mutex::new(workers),
            activity,
            stopped: AtomicBool::new(false),
        }))
    }

    /// A binder attaching agents to this dispatcher.
    pub fn binder(self: &Arc<Self>) -> DispBinderRef {
        Arc::new(OnePerPrioBinder {
            disp: Arc::clone(self),
        })
    }

    /// Worker activity tracker.
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    /// Stop all priority threads.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let workers: Vec<WorkThread> = self.workers.lock().drain(..).collect();
        for worker in workers {
            worker.stop_and_join();
        }
    }
}

impl Drop for OnePerPrioDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct OnePerPrioBinder {
    disp: Arc<OnePerPrioDispatcher>,
}

impl DispBinder for OnePerPrioBinder {
    fn preallocate(&self, _agent: &Arc<AgentRuntime>) -> Result<(), DispatcherError> {
        if self.disp.stopped.load(Ordering::Acquire) {
            return Err(DispatcherError::DispatcherStopped);
        }
        Ok(())
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentRuntime>) {}

    fn bind(&self, agent: &Arc<AgentRuntime>) -> EventQueueRef {
        Arc::clone(&self.disp.queues[agent.priority().index()]) as EventQueueRef
    }

    fn unbind(&self, _agent: &Arc<AgentRuntime>) {}
}
