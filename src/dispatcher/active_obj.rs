// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use super::binder::{fatal_bind_violation, DispBinder, DispBinderRef, DispatcherError};
use super::demand_queue::MpscDemandQueue;
use super::event_queue::EventQueueRef;
use super::one_thread::DispatcherParams;
use super::work_thread::{ActivityTracker, WorkThread};
use crate::agent::runtime::AgentRuntime;
use crate::util::AgentId;

struct AgentThread {
    queue: Arc<MpscDemandQueue>,
    worker: WorkThread,
}

struct ActiveObjCore {
    params: DispatcherParams,
    agents: DashMap<AgentId, AgentThread>,
    activity: Arc<ActivityTracker>,
    stopped: AtomicBool,
}

/// One worker thread per bound agent. Handlers of different agents run
/// in parallel; each agent sees strict FIFO on its own thread.
///
/// The handle is cheap to clone; agent threads are owned by the shared
/// core, which binders keep alive until their cooperations are gone.
#[derive(Clone)]
pub struct ActiveObjDispatcher {
    core: Arc<ActiveObjCore>,
}

impl ActiveObjDispatcher {
    pub fn new(params: DispatcherParams) -> Self {
        let activity = ActivityTracker::new(params.activity_tracking);
        Self {
            core: Arc::new(ActiveObjCore {
                params,
                agents: DashMap::new(),
                activity,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// A binder attaching agents to this dispatcher.
    pub fn binder(&self) -> DispBinderRef {
        Arc::new(ActiveObjBinder {
            core: Arc::clone(&self.core),
        })
    }

    /// Worker activity tracker (shared by all agent threads).
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.core.activity
    }

    /// Number of currently bound agents.
    pub fn agent_count(&self) -> usize {
        self.core.agents.len()
    }

    /// Stop every agent thread.
    pub fn stop(&self) {
        self.core.stopped.store(true, Ordering::Release);
        let ids: Vec<AgentId> = self.core.agents.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.core.agents.remove(&id) {
                entry.worker.stop_and_join();
            }
        }
    }
}

struct ActiveObjBinder {
    core: Arc<ActiveObjCore>,
}

impl DispBinder for ActiveObjBinder {
    fn preallocate(&self, agent: &Arc<AgentRuntime>) -> Result<(), DispatcherError> {
        if self.core.stopped.load(Ordering::Acquire) {
            return Err(DispatcherError::DispatcherStopped);
        }
        let queue = Arc::new(MpscDemandQueue::new(self.core.params.lock_factory));
        let worker = WorkThread::start(
            format!("{}:{}", self.core.params.thread_name, agent.id().raw()),
            Arc::clone(&queue),
            Arc::clone(&self.core.activity),
        )?;
        self.core
            .agents
            .insert(agent.id(), AgentThread { queue, worker });
        Ok(())
    }

    fn undo_preallocation(&self, agent: &Arc<AgentRuntime>) {
        if let Some((_, entry)) = self.core.agents.remove(&agent.id()) {
            entry.worker.stop_and_join();
        }
    }

    fn bind(&self, agent: &Arc<AgentRuntime>) -> EventQueueRef {
        match self.core.agents.get(&agent.id()) {
            Some(entry) => Arc::clone(&entry.queue) as EventQueueRef,
            None => fatal_bind_violation("active_obj"),
        }
    }

    fn unbind(&self, agent: &Arc<AgentRuntime>) {
        if let Some((_, entry)) = self.core.agents.remove(&agent.id()) {
            entry.worker.stop_and_join();
        }
    }
}
