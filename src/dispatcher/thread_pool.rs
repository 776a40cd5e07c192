// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use super::binder::{fatal_bind_violation, DispBinder, DispBinderRef, DispatcherError};
use super::event_queue::{EventQueue, EventQueueRef, ExecutionDemand};
use super::queue_lock::QueueLockFactory;
use super::work_thread::ActivityTracker;
use crate::agent::runtime::AgentRuntime;
use crate::util::{AgentId, CoopId};

/// How agents of one cooperation share thread-pool agent queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FifoKind {
    /// All agents of a cooperation share one queue: they never run in
    /// parallel with each other.
    #[default]
    Cooperation,
    /// Every agent gets its own queue: agents of one cooperation may
    /// run concurrently.
    Individual,
}

/// Per-binding parameters of the thread-pool dispatchers.
#[derive(Debug, Clone)]
pub struct BindParams {
    /// Queue sharing discipline.
    pub fifo: FifoKind,
    /// How many demands a worker processes from one agent queue before
    /// releasing it back to the scheduler.
    pub max_demands_at_once: usize,
}

impl Default for BindParams {
    fn default() -> Self {
        Self {
            fifo: FifoKind::default(),
            max_demands_at_once: 4,
        }
    }
}

/// Construction parameters of [`ThreadPoolDispatcher`].
#[derive(Debug, Clone)]
pub struct ThreadPoolParams {
    /// Number of worker threads. Defaults to the machine parallelism.
    pub thread_count: usize,
    /// Waiting strategy of the scheduling queue.
    pub lock_factory: QueueLockFactory,
    /// Measure working/waiting time per worker.
    pub activity_tracking: bool,
    /// Base name for worker threads.
    pub thread_name: String,
}

impl Default for ThreadPoolParams {
    fn default() -> Self {
        Self {
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            lock_factory: QueueLockFactory::default(),
            activity_tracking: false,
            thread_name: "tpool".to_string(),
        }
    }
}

/// MPMC queue of ready agent queues: workers pop the next agent queue
/// with pending demands.
pub(crate) struct SchedQueue {
    inner: Mutex<VecDeque<Arc<AgentQueue>>>,
    not_empty: Condvar,
    shutdown: AtomicBool,
    busy_wait: Option<Duration>,
}

impl SchedQueue {
    fn new(lock_factory: QueueLockFactory) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            shutdown: AtomicBool::new(false),
            busy_wait: lock_factory.busy_wait(),
        })
    }

    fn push(&self, queue: Arc<AgentQueue>) {
        let mut inner = self.inner.lock();
        inner.push_back(queue);
        self.not_empty.notify_one();
    }

    fn pop(&self) -> Option<Arc<AgentQueue>> {
        let spin_deadline = self.busy_wait.map(|w| Instant::now() + w);
        loop {
            let mut inner = self.inner.lock();
            loop {
                if let Some(queue) = inner.pop_front() {
                    return Some(queue);
                }
                if self.shutdown.load(Ordering::Acquire) {
                    return None;
                }
                match spin_deadline {
                    Some(deadline) if Instant::now() < deadline => break,
                    _ => {
                        self.not_empty.wait(&mut inner);
                    }
                }
            }
            drop(inner);
            std::thread::yield_now();
        }
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.clear();
        self.not_empty.notify_all();
    }
}

struct AgentQueueInner {
    demands: VecDeque<ExecutionDemand>,
    scheduled: bool,
}

/// Per-agent (or per-coop) demand FIFO scheduled into the shared
/// [`SchedQueue`] whenever it becomes non-empty.
pub(crate) struct AgentQueue {
    inner: Mutex<AgentQueueInner>,
    sched: Weak<SchedQueue>,
    max_at_once: usize,
    self_weak: OnceLock<Weak<AgentQueue>>,
}

impl AgentQueue {
    fn new(sched: &Arc<SchedQueue>, max_at_once: usize) -> Arc<Self> {
        let queue = Arc::new(Self {
            inner: Mutex::new(AgentQueueInner {
                demands: VecDeque::new(),
                scheduled: false,
            }),
            sched: Arc::downgrade(sched),
            max_at_once: max_at_once.max(1),
            self_weak: OnceLock::new(),
        });
        let _ = queue.self_weak.set(Arc::downgrade(&queue));
        queue
    }

    fn me(&self) -> Option<Arc<AgentQueue>> {
        self.self_weak.get().and_then(Weak::upgrade)
    }

    /// Serve up to `max_at_once` demands, then either release the queue
    /// (empty) or hand it back to the scheduler (more work pending).
    fn process(&self) {
        let mut served = 0usize;
        loop {
            let demand = {
                let mut inner = self.inner.lock();
                match inner.demands.pop_front() {
                    Some(demand) => demand,
                    None => {
                        inner.scheduled = false;
                        return;
                    }
                }
            };
            demand.execute();
            served += 1;
            if served >= self.max_at_once {
                let mut inner = self.inner.lock();
                if inner.demands.is_empty() {
                    inner.scheduled = false;
                } else if let (Some(sched), Some(me)) = (self.sched.upgrade(), self.me()) {
                    sched.push(me);
                } else {
                    inner.scheduled = false;
                }
                return;
            }
        }
    }
}

impl EventQueue for AgentQueue {
    fn push(&self, demand: ExecutionDemand) {
        let mut inner = self.inner.lock();
        inner.demands.push_back(demand);
        if !inner.scheduled {
            if let (Some(sched), Some(me)) = (self.sched.upgrade(), self.me()) {
                inner.scheduled = true;
                sched.push(me);
            }
        }
    }
}

struct ThreadPoolCore {
    sched: Arc<SchedQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    activity: Arc<ActivityTracker>,
    stopped: AtomicBool,
}

impl ThreadPoolCore {
    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sched.stop();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPoolCore {
    fn drop(&mut self) {
        self.stop();
    }
}

/// N worker threads sharing an MPMC queue of agent queues. Each bound
/// agent (or cooperation, per [`FifoKind`]) owns its FIFO; a worker
/// picks a ready FIFO, serves up to `max_demands_at_once` demands and
/// releases it.
///
/// The handle is cheap to clone; worker threads are owned by the shared
/// core, which binders keep alive until their cooperations are gone.
#[derive(Clone)]
pub struct ThreadPoolDispatcher {
    core: Arc<ThreadPoolCore>,
}

impl ThreadPoolDispatcher {
    pub fn new(params: ThreadPoolParams) -> Result<Self, DispatcherError> {
        let sched = SchedQueue::new(params.lock_factory);
        let activity = ActivityTracker::new(params.activity_tracking);
        let mut workers = Vec::with_capacity(params.thread_count);
        for i in 0..params.thread_count.max(1) {
            let sched = Arc::clone(&sched);
            let activity = Arc::clone(&activity);
            let handle = std::thread::Builder::new()
                .name(format!("{}:{}", params.thread_name, i))
                .spawn(move || pool_worker_loop(&sched, &activity))?;
            workers.push(handle);
        }
        Ok(Self {
            core: Arc::new(ThreadPoolCore {
                sched,
                workers: Mutex::new(workers),
                activity,
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// A binder with the given FIFO discipline.
    pub fn binder(&self, params: BindParams) -> DispBinderRef {
        Arc::new(ThreadPoolBinder {
            core: Arc::clone(&self.core),
            params,
            queues: DashMap::new(),
        })
    }

    /// Worker activity tracker.
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.core.activity
    }

    /// Stop all worker threads.
    pub fn stop(&self) {
        self.core.stop();
    }
}

fn pool_worker_loop(sched: &Arc<SchedQueue>, activity: &Arc<ActivityTracker>) {
    loop {
        let wait_started = Instant::now();
        let Some(queue) = sched.pop() else { return };
        activity.record_waiting(wait_started.elapsed());
        let work_started = Instant::now();
        queue.process();
        activity.record_working(work_started.elapsed());
    }
}

/// Key of an agent queue in a thread-pool binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BindKey {
    Agent(AgentId),
    Coop(CoopId),
}

struct QueueSlot {
    queue: Arc<AgentQueue>,
    refs: usize,
}

struct ThreadPoolBinder {
    core: Arc<ThreadPoolCore>,
    params: BindParams,
    queues: DashMap<BindKey, QueueSlot>,
}

impl ThreadPoolBinder {
    fn key_for(&self, agent: &Arc<AgentRuntime>) -> BindKey {
        match self.params.fifo {
            FifoKind::Individual => BindKey::Agent(agent.id()),
            FifoKind::Cooperation => match agent.shared().coop_id() {
                Some(coop) => BindKey::Coop(coop),
                // An agent outside any coop cannot share a coop queue.
                None => BindKey::Agent(agent.id()),
            },
        }
    }

    fn release(&self, key: BindKey) {
        let mut remove = false;
        if let Some(mut slot) = self.queues.get_mut(&key) {
            slot.refs -= 1;
            remove = slot.refs == 0;
        }
        if remove {
            self.queues.remove(&key);
        }
    }
}

impl DispBinder for ThreadPoolBinder {
    fn preallocate(&self, agent: &Arc<AgentRuntime>) -> Result<(), DispatcherError> {
        if self.core.stopped.load(Ordering::Acquire) {
            return Err(DispatcherError::DispatcherStopped);
        }
        let key = self.key_for(agent);
        let mut slot = self.queues.entry(key).or_insert_with(|| QueueSlot {
            queue: AgentQueue::new(&self.core.sched, self.params.max_demands_at_once),
            refs: 0,
        });
        slot.refs += 1;
        Ok(())
    }

    fn undo_preallocation(&self, agent: &Arc<AgentRuntime>) {
        self.release(self.key_for(agent));
    }

    fn bind(&self, agent: &Arc<AgentRuntime>) -> EventQueueRef {
        match self.queues.get(&self.key_for(agent)) {
            Some(slot) => Arc::clone(&slot.queue) as EventQueueRef,
            None => fatal_bind_violation("thread_pool"),
        }
    }

    fn unbind(&self, agent: &Arc<AgentRuntime>) {
        self.release(self.key_for(agent));
    }
}
