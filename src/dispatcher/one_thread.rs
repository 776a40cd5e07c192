// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use super::binder::{DispBinder, DispBinderRef, DispatcherError};
use super::demand_queue::MpscDemandQueue;
use super::event_queue::EventQueueRef;
use super::queue_lock::QueueLockFactory;
use super::work_thread::{ActivityTracker, WorkThread};
use crate::agent::runtime::AgentRuntime;

/// Parameters shared by the single-consumer dispatcher variants.
#[derive(Debug, Clone)]
pub struct DispatcherParams {
    /// Base name for the worker thread(s).
    pub thread_name: String,
    /// Waiting strategy of the demand queue.
    pub lock_factory: QueueLockFactory,
    /// Measure working/waiting time per worker thread.
    pub activity_tracking: bool,
}

impl Default for DispatcherParams {
    fn default() -> Self {
        Self {
            thread_name: "disp".to_string(),
            lock_factory: QueueLockFactory::default(),
            activity_tracking: false,
        }
    }
}

impl DispatcherParams {
    /// Set the worker thread name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Select the queue waiting strategy.
    pub fn with_lock_factory(mut self, factory: QueueLockFactory) -> Self {
        self.lock_factory = factory;
        self
    }

    /// Turn on activity tracking.
    pub fn with_activity_tracking(mut self, enabled: bool) -> Self {
        self.activity_tracking = enabled;
        self
    }
}

struct OneThreadCore {
    queue: Arc<MpscDemandQueue>,
    worker: Mutex<Option<WorkThread>>,
    activity: Arc<ActivityTracker>,
}

/// A single worker thread serving one FIFO shared by all bound agents.
/// No two handlers run concurrently on this dispatcher, regardless of
/// which agents they belong to.
///
/// The handle is cheap to clone. Worker threads live while any handle
/// or binder (and therefore any cooperation using it) is alive; the
/// last reference stops and joins them.
#[derive(Clone)]
pub struct OneThreadDispatcher {
    core: Arc<OneThreadCore>,
}

impl OneThreadDispatcher {
    /// Start the dispatcher with its worker thread.
    pub fn new(params: DispatcherParams) -> Result<Self, DispatcherError> {
        let queue = Arc::new(MpscDemandQueue::new(params.lock_factory));
        let activity = ActivityTracker::new(params.activity_tracking);
        let worker = WorkThread::start(
            params.thread_name,
            Arc::clone(&queue),
            Arc::clone(&activity),
        )?;
        Ok(Self {
            core: Arc::new(OneThreadCore {
                queue,
                worker: Mutex::new(Some(worker)),
                activity,
            }),
        })
    }

    /// A binder attaching agents to this dispatcher.
    pub fn binder(&self) -> DispBinderRef {
        Arc::new(OneThreadBinder {
            core: Arc::clone(&self.core),
        })
    }

    /// Worker activity tracker.
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.core.activity
    }

    /// Current demand-queue length (stats source).
    pub fn queue_len(&self) -> usize {
        self.core.queue.len()
    }

    /// Stop the worker thread. Demands still queued are dropped.
    pub fn stop(&self) {
        if let Some(worker) = self.core.worker.lock().take() {
            worker.stop_and_join();
        }
    }
}

struct OneThreadBinder {
    core: Arc<OneThreadCore>,
}

impl DispBinder for OneThreadBinder {
    fn preallocate(&self, _agent: &Arc<AgentRuntime>) -> Result<(), DispatcherError> {
        if self.core.worker.lock().is_none() {
            return Err(DispatcherError::DispatcherStopped);
        }
        Ok(())
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentRuntime>) {}

    fn bind(&self, _agent: &Arc<AgentRuntime>) -> EventQueueRef {
        Arc::clone(&self.core.queue) as EventQueueRef
    }

    fn unbind(&self, _agent: &Arc<AgentRuntime>) {}
}
