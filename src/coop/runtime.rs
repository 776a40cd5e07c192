// Layer 1: Standard library imports
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use super::{DeregNotificator, DeregReason, RegNotificator};
use crate::agent::runtime::AgentRuntime;
use crate::agent::ExceptionReaction;
use crate::dispatcher::binder::DispBinderRef;
use crate::dispatcher::event_queue::DemandKind;
use crate::env::Environment;
use crate::util::CoopId;

/// Lightweight reference to a registered cooperation.
///
/// Stays valid (resolvable) while the cooperation is live; after final
/// deregistration every operation through the handle reports
/// `CoopNotFound`.
#[derive(Clone)]
pub struct CoopHandle {
    id: CoopId,
    name: Arc<String>,
    runtime: Weak<CoopRuntime>,
}

impl CoopHandle {
    /// Id of the cooperation.
    pub fn id(&self) -> CoopId {
        self.id
    }

    /// Name of the cooperation (generated for anonymous ones).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Is the cooperation still live (not finally deregistered)?
    pub fn is_live(&self) -> bool {
        self.runtime.strong_count() > 0
    }

    pub(crate) fn runtime(&self) -> Option<Arc<CoopRuntime>> {
        self.runtime.upgrade()
    }
}

impl fmt::Debug for CoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoopHandle({}, `{}`)", self.id, self.name)
    }
}

/// One agent of a registered cooperation plus its binder.
pub(crate) struct CoopAgent {
    pub(crate) runtime: Arc<AgentRuntime>,
    pub(crate) binder: DispBinderRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoopStatus {
    Registered,
    Deregistering,
}

/// A registered cooperation.
///
/// `undone_work` counts the agents that have not finished plus the
/// child cooperations that have not finally deregistered; when it hits
/// zero the coop is handed to the environment's finalizer thread for
/// the final deregistration stage.
pub(crate) struct CoopRuntime {
    id: CoopId,
    name: Arc<String>,
    env: Environment,
    parent: Option<Weak<CoopRuntime>>,
    pub(crate) agents: Vec<CoopAgent>,
    children: Mutex<Vec<Arc<CoopRuntime>>>,
    status: Mutex<CoopStatus>,
    dereg_reason: Mutex<Option<DeregReason>>,
    undone_work: AtomicUsize,
    self_weak: OnceLock<Weak<CoopRuntime>>,
    reg_notificators: Vec<RegNotificator>,
    dereg_notificators: Vec<DeregNotificator>,
    exception_reaction: ExceptionReaction,
}

impl CoopRuntime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: CoopId,
        name: String,
        env: Environment,
        parent: Option<&Arc<CoopRuntime>>,
        agents: Vec<CoopAgent>,
        reg_notificators: Vec<RegNotificator>,
        dereg_notificators: Vec<DeregNotificator>,
        exception_reaction: ExceptionReaction,
    ) -> Arc<Self> {
        let undone = agents.len();
        let runtime = Arc::new(Self {
            id,
            name: Arc::new(name),
            env,
            parent: parent.map(Arc::downgrade),
            agents,
            children: Mutex::new(Vec::new()),
            status: Mutex::new(CoopStatus::Registered),
            dereg_reason: Mutex::new(None),
            undone_work: AtomicUsize::new(undone),
            self_weak: OnceLock::new(),
            reg_notificators,
            dereg_notificators,
            exception_reaction,
        });
        let _ = runtime.self_weak.set(Arc::downgrade(&runtime));
        for agent in &runtime.agents {
            agent.runtime.shared().attach_coop(&runtime);
        }
        runtime
    }

    pub(crate) fn id(&self) -> CoopId {
        self.id
    }

    pub(crate) fn name(&self) -> &Arc<String> {
        &self.name
    }

    pub(crate) fn handle(self: &Arc<Self>) -> CoopHandle {
        CoopHandle {
            id: self.id,
            name: Arc::clone(&self.name),
            runtime: Arc::downgrade(self),
        }
    }

    pub(crate) fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Resolve the effective exception reaction for agents answering
    /// `Inherit`: coop, then parents, then the environment default.
    pub(crate) fn exception_reaction(&self) -> ExceptionReaction {
        match self.exception_reaction {
            ExceptionReaction::Inherit => {
                match self.parent.as_ref().and_then(Weak::upgrade) {
                    Some(parent) => parent.exception_reaction(),
                    None => self.env.default_exception_reaction(),
                }
            }
            concrete => concrete,
        }
    }

    /// Attach a child cooperation. Fails when this coop is already
    /// deregistering: the status check under the status lock orders
    /// attachment against the deregistration cascade, so a child is
    /// either part of the cascade snapshot or rejected here.
    pub(crate) fn add_child(&self, child: &Arc<CoopRuntime>) -> bool {
        let status = self.status.lock();
        if *status == CoopStatus::Deregistering {
            return false;
        }
        self.children.lock().push(Arc::clone(child));
        self.undone_work.fetch_add(1, Ordering::AcqRel);
        drop(status);
        true
    }

    fn remove_child(&self, id: CoopId) {
        self.children.lock().retain(|c| c.id != id);
    }

    /// Undo `add_child` for a registration that failed afterwards.
    pub(crate) fn rollback_child(&self, id: CoopId) {
        self.remove_child(id);
        self.work_done();
    }

    /// First phase of deregistration: mark the tree, propagate to the
    /// children (post-order completion is enforced by the work
    /// counter), enqueue `evt_finish` for every agent.
    pub(crate) fn initiate_deregistration(&self, reason: DeregReason) {
        {
            let mut status = self.status.lock();
            if *status == CoopStatus::Deregistering {
                // First reason wins; repeated requests are no-ops.
                return;
            }
            *status = CoopStatus::Deregistering;
        }
        *self.dereg_reason.lock() = Some(reason);

        let children: Vec<Arc<CoopRuntime>> = self.children.lock().clone();
        for child in children {
            child.initiate_deregistration(DeregReason::ParentDeregistration);
        }

        for agent in &self.agents {
            let demand = agent.runtime.lifecycle_demand(DemandKind::EvtFinish);
            agent.runtime.shared().push_demand(demand);
        }
    }

    /// Called by an agent after its `so_evt_finish` ran.
    pub(crate) fn agent_finished(&self) {
        self.work_done();
    }

    fn child_finished(&self) {
        self.work_done();
    }

    fn work_done(&self) {
        if self.undone_work.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(me) = self.self_weak.get().and_then(Weak::upgrade) {
                self.env.enqueue_final_dereg(me);
            }
        }
    }

    /// Final deregistration stage; runs on the environment's finalizer
    /// thread so that binder unbinding may join worker threads safely.
    pub(crate) fn final_deregistration(self: &Arc<Self>) {
        for agent in &self.agents {
            agent.binder.unbind(&agent.runtime);
            self.env.notify_queue_unbind(agent.runtime.id());
            agent.runtime.shared().detach_queue();
        }

        let reason = self.dereg_reason.lock().unwrap_or(DeregReason::Normal);
        self.env.coop_registry().remove(self.id, self.name.as_str());

        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.remove_child(self.id);
            parent.child_finished();
        }

        // Notifications run outside all registry locks.
        let handle = self.handle();
        for notificator in &self.dereg_notificators {
            notificator(&self.env, &handle, reason);
        }
        self.env.notify_coop_deregistered(&handle, reason);
        self.env.on_coop_removed();
    }

    /// Registration notifications, run after the coop went live.
    pub(crate) fn fire_reg_notifications(self: &Arc<Self>) {
        let handle = self.handle();
        for notificator in &self.reg_notificators {
            notificator(&self.env, &handle);
        }
        self.env.notify_coop_registered(&handle);
    }
}

impl fmt::Debug for CoopRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoopRuntime")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("agents", &self.agents.len())
            .finish_non_exhaustive()
    }
}
