// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use super::binder::{fatal_bind_violation, DispBinder, DispBinderRef, DispatcherError};
use super::demand_queue::MpscDemandQueue;
use super::event_queue::EventQueueRef;
use super::one_thread::DispatcherParams;
use super::work_thread::{ActivityTracker, WorkThread};
use crate::agent::runtime::AgentRuntime;

struct GroupEntry {
    queue: Arc<MpscDemandQueue>,
    worker: Option<WorkThread>,
    refs: usize,
}

struct ActiveGroupCore {
    params: DispatcherParams,
    groups: Mutex<HashMap<String, GroupEntry>>,
    activity: Arc<ActivityTracker>,
    stopped: AtomicBool,
}

/// Agents are grouped by name; each group shares one worker thread.
/// Related agents can be co-located on one context while staying
/// isolated from other groups.
///
/// The handle is cheap to clone; group threads are owned by the shared
/// core, which binders keep alive until their cooperations are gone.
#[derive(Clone)]
pub struct ActiveGroupDispatcher {
    core: Arc<ActiveGroupCore>,
}

impl ActiveGroupDispatcher {
    pub fn new(params: DispatcherParams) -> Self {
        let activity = ActivityTracker::new(params.activity_tracking);
        Self {
            core: Arc::new(ActiveGroupCore {
                params,
                groups: Mutex::new(HashMap::new()),
                activity,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// A binder attaching agents to the named group. The group's thread
    /// starts with its first agent and stops with its last.
    pub fn binder(&self, group: impl Into<String>) -> DispBinderRef {
        Arc::new(ActiveGroupBinder {
            core: Arc::clone(&self.core),
            group: group.into(),
        })
    }

    /// Worker activity tracker (shared by all group threads).
    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.core.activity
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.core.groups.lock().len()
    }

    /// Stop every group thread.
    pub fn stop(&self) {
        self.core.stopped.store(true, Ordering::Release);
        let workers: Vec<WorkThread> = {
            let mut groups = self.core.groups.lock();
            groups
                .drain()
                .filter_map(|(_, mut entry)| entry.worker.take())
                .collect()
        };
        for worker in workers {
            worker.stop_and_join();
        }
    }
}

struct ActiveGroupBinder {
    core: Arc<ActiveGroupCore>,
    group: String,
}

impl ActiveGroupBinder {
    fn release(&self) {
        let worker = {
            let mut groups = self.core.groups.lock();
            match groups.get_mut(&self.group) {
                Some(entry) => {
                    entry.refs -= 1;
                    if entry.refs == 0 {
                        let worker = entry.worker.take();
                        groups.remove(&self.group);
                        worker
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        // Joining happens outside the groups lock.
        if let Some(worker) = worker {
            worker.stop_and_join();
        }
    }
}

impl DispBinder for ActiveGroupBinder {
    fn preallocate(&self, _agent: &Arc<AgentRuntime>) -> Result<(), DispatcherError> {
        if self.core.stopped.load(Ordering::Acquire) {
            return Err(DispatcherError::DispatcherStopped);
        }
        let mut groups = self.core.groups.lock();
        if let Some(entry) = groups.get_mut(&self.group) {
            entry.refs += 1;
            return Ok(());
        }
        let queue = Arc::new(MpscDemandQueue::new(self.core.params.lock_factory));
        let worker = WorkThread::start(
            format!("{}:{}", self.core.params.thread_name, self.group),
            Arc::clone(&queue),
            Arc::clone(&self.core.activity),
        )?;
        groups.insert(
            self.group.clone(),
            GroupEntry {
                queue,
                worker: Some(worker),
                refs: 1,
            },
        );
        Ok(())
    }

    fn undo_preallocation(&self, _agent: &Arc<AgentRuntime>) {
        self.release();
    }

    fn bind(&self, _agent: &Arc<AgentRuntime>) -> EventQueueRef {
        match self.core.groups.lock().get(&self.group) {
            Some(entry) => Arc::clone(&entry.queue) as EventQueueRef,
            None => fatal_bind_violation("active_group"),
        }
    }

    fn unbind(&self, _agent: &Arc<AgentRuntime>) {
        self.release();
    }
}
