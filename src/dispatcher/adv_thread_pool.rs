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
use crate::agent::handler::ThreadSafety;
use crate::agent::runtime::AgentRuntime;
use crate::util::AgentId;

/// Construction parameters of [`AdvThreadPoolDispatcher`].
#[derive(Debug, Clone)]
pub struct AdvThreadPoolParams {
    /// Number of worker threads. Defaults to the machine parallelism.
    pub thread_count: usize,
    /// Waiting strategy of the task queue.
    pub lock_factory: QueueLockFactory,
    /// Measure working/waiting time per worker.
    pub activity_tracking: bool,
    /// Base name for worker threads.
    pub thread_name: String,
}

impl Default for AdvThreadPoolParams {
    fn default() -> Self {
        Self {
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            lock_factory: QueueLockFactory::default(),
            activity_tracking: false,
            thread_name: "atpool".to_string(),
        }
    }
}

struct AtpTask {
    queue: Arc<AtpAgentQueue>,
    demand: ExecutionDemand,
    safety: ThreadSafety,
}

/// The part worker threads and agent queues share; owning it does not
/// keep the worker threads alive.
struct AtpShared {
    tasks: Mutex<VecDeque<AtpTask>>,
    not_empty: Condvar,
    shutdown: AtomicBool,
    busy_wait: Option<Duration>,
    activity: Arc<ActivityTracker>,
}

impl AtpShared {
    fn push_task(&self, task: AtpTask) {
        let mut tasks = self.tasks.lock();
        tasks.push_back(task);
        self.not_empty.notify_one();
    }

    fn pop_task(&self) -> Option<AtpTask> {
        let spin_deadline = self.busy_wait.map(|w| Instant::now() + w);
        loop {
            let mut tasks = self.tasks.lock();
            loop {
                if let Some(task) = tasks.pop_front() {
                    return Some(task);
                }
                if self.shutdown.load(Ordering::Acquire) {
                    return None;
                }
                match spin_deadline {
                    Some(deadline) if Instant::now() < deadline => break,
                    _ => {
                        self.not_empty.wait(&mut tasks);
                    }
                }
            }
            drop(tasks);
            std::thread::yield_now();
        }
    }
}

struct AtpCore {
    shared: Arc<AtpShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl AtpCore {
    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let mut tasks = self.shared.tasks.lock();
            tasks.clear();
            self.shared.not_empty.notify_all();
        }
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for AtpCore {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AtpInner {
    demands: VecDeque<ExecutionDemand>,
    active_safe: usize,
    exclusive_running: bool,
}

/// Per-agent queue that dispatches demands to the shared worker pool
/// according to handler thread safety: any number of thread-safe
/// demands of one agent may be in flight at once, a not-thread-safe
/// demand runs alone.
struct AtpAgentQueue {
    inner: Mutex<AtpInner>,
    core: Weak<AtpShared>,
    self_weak: OnceLock<Weak<AtpAgentQueue>>,
}

impl AtpAgentQueue {
    fn new(core: &Arc<AtpShared>) -> Arc<Self> {
        let queue = Arc::new(Self {
            inner: Mutex::new(AtpInner {
                demands: VecDeque::new(),
                active_safe: 0,
                exclusive_running: false,
            }),
            core: Arc::downgrade(core),
            self_weak: OnceLock::new(),
        });
        let _ = queue.self_weak.set(Arc::downgrade(&queue));
        queue
    }

    fn me(&self) -> Option<Arc<AtpAgentQueue>> {
        self.self_weak.get().and_then(Weak::upgrade)
    }

    /// Dispatch every demand at the queue head that may run now. The
    /// execution hint (resolved handler thread safety) decides: a run
    /// of thread-safe demands goes out in parallel; a not-thread-safe
    /// demand waits for the agent to become idle and then runs alone.
    fn pump(&self, inner: &mut AtpInner) {
        let (Some(core), Some(me)) = (self.core.upgrade(), self.me()) else {
            return;
        };
        loop {
            if inner.exclusive_running {
                return;
            }
            let Some(front) = inner.demands.front() else {
                return;
            };
            let safety = front.agent.hint_thread_safety(front);
            match safety {
                ThreadSafety::Safe => {
                    if let Some(demand) = inner.demands.pop_front() {
                        inner.active_safe += 1;
                        core.push_task(AtpTask {
                            queue: Arc::clone(&me),
                            demand,
                            safety,
                        });
                    }
                }
                ThreadSafety::NotSafe => {
                    if inner.active_safe == 0 {
                        if let Some(demand) = inner.demands.pop_front() {
                            inner.exclusive_running = true;
                            core.push_task(AtpTask {
                                queue: Arc::clone(&me),
                                demand,
                                safety,
                            });
                        }
                    }
                    return;
                }
            }
        }
    }

    fn task_done(&self, safety: ThreadSafety) {
        let mut inner = self.inner.lock();
        match safety {
            ThreadSafety::Safe => inner.active_safe = inner.active_safe.saturating_sub(1),
            ThreadSafety::NotSafe => inner.exclusive_running = false,
        }
        self.pump(&mut inner);
    }
}

impl EventQueue for AtpAgentQueue {
    fn push(&self, demand: ExecutionDemand) {
        let mut inner = self.inner.lock();
        inner.demands.push_back(demand);
        self.pump(&mut inner);
    }
}

/// Thread pool that honors handler thread safety: thread-safe handlers
/// of the same agent run in parallel on different workers, while
/// not-thread-safe handlers stay exclusive with respect to that agent.
///
/// The handle is cheap to clone; worker threads are owned by the shared
/// core, which binders keep alive until their cooperations are gone.
#[derive(Clone)]
pub struct AdvThreadPoolDispatcher {
    core: Arc<AtpCore>,
}

impl AdvThreadPoolDispatcher {
    pub fn new(params: AdvThreadPoolParams) -> Result<Self, DispatcherError> {
        let activity = ActivityTracker::new(params.activity_tracking);
        let shared = Arc::new(AtpShared {
            tasks: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            shutdown: AtomicBool::new(false),
            busy_wait: params.lock_factory.busy_wait(),
            activity,
        });
        let core = Arc::new(AtpCore {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        });
        {
            let mut workers = core.workers.lock();
            for i in 0..params.thread_count.max(1) {
                let worker_shared = Arc::clone(&shared);
                let handle = std::thread::Builder::new()
                    .name(format!("{}:{}", params.thread_name, i))
                    .spawn(move || atp_worker_loop(&worker_shared))?;
                workers.push(handle);
            }
        }
        Ok(Self { core })
    }

    /// A binder attaching agents to this dispatcher.
    pub fn binder(&self) -> DispBinderRef {
        Arc::new(AtpBinder {
            core: Arc::clone(&self.core),
            queues: DashMap::new(),
        })
    }

    /// Worker activity tracker.
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.core.shared.activity
    }

    /// Stop all worker threads.
    pub fn stop(&self) {
        self.core.stop();
    }
}

fn atp_worker_loop(core: &Arc<AtpShared>) {
    loop {
        let wait_started = Instant::now();
        let Some(task) = core.pop_task() else { return };
        core.activity.record_waiting(wait_started.elapsed());
        let work_started = Instant::now();
        task.demand.execute();
        core.activity.record_working(work_started.elapsed());
        task.queue.task_done(task.safety);
    }
}

struct AtpBinder {
    core: Arc<AtpCore>,
    queues: DashMap<AgentId, Arc<AtpAgentQueue>>,
}

impl DispBinder for AtpBinder {
    fn preallocate(&self, agent: &Arc<AgentRuntime>) -> Result<(), DispatcherError> {
        if self.core.stopped.load(Ordering::Acquire) {
            return Err(DispatcherError::DispatcherStopped);
        }
        self.queues
            .insert(agent.id(), AtpAgentQueue::new(&self.core.shared));
        Ok(())
    }

    fn undo_preallocation(&self, agent: &Arc<AgentRuntime>) {
        self.queues.remove(&agent.id());
    }

    fn bind(&self, agent: &Arc<AgentRuntime>) -> EventQueueRef {
        // Handlers of this agent may run on several pool threads at
        // once, which restricts its legal exception reactions.
        agent.shared().mark_mt_context();
        match self.queues.get(&agent.id()) {
            Some(queue) => Arc::clone(queue.value()) as EventQueueRef,
            None => fatal_bind_violation("adv_thread_pool"),
        }
    }

    fn unbind(&self, agent: &Arc<AgentRuntime>) {
        self.queues.remove(&agent.id());
    }
}
