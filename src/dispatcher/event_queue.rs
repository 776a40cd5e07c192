// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use crate::agent::runtime::AgentRuntime;
use crate::limit::LimitGuard;
use crate::message::MessageRef;
use crate::util::{AgentId, MboxId};

/// Kind of an execution demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemandKind {
    /// Run `so_evt_start`; always the first demand of an agent.
    EvtStart,
    /// Run a message handler.
    Message,
    /// Run `so_evt_finish`; always the last demand of an agent.
    EvtFinish,
}

/// The unit a worker thread dequeues: one message (or lifecycle event)
/// addressed to one agent.
pub struct ExecutionDemand {
    pub(crate) agent: Arc<AgentRuntime>,
    pub(crate) mbox_id: MboxId,
    pub(crate) message: MessageRef,
    pub(crate) kind: DemandKind,
    pub(crate) limit: LimitGuard,
}

impl ExecutionDemand {
    pub(crate) fn new(
        agent: Arc<AgentRuntime>,
        mbox_id: MboxId,
        message: MessageRef,
        kind: DemandKind,
        limit: LimitGuard,
    ) -> Self {
        Self {
            agent,
            mbox_id,
            message,
            kind,
            limit,
        }
    }

    /// Kind of this demand.
    pub fn kind(&self) -> DemandKind {
        self.kind
    }

    /// Id of the receiving agent.
    pub fn agent_id(&self) -> AgentId {
        self.agent.id()
    }

    /// Execute the demand on the calling thread. Consumes the demand;
    /// the limit slot (if any) is released afterwards.
    pub fn execute(self) {
        let agent = Arc::clone(&self.agent);
        agent.exec_demand(self);
    }
}

impl std::fmt::Debug for ExecutionDemand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDemand")
            .field("agent", &self.agent.id())
            .field("mbox", &self.mbox_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Abstract sink for execution demands: the channel between an mbox
/// push and a dispatcher's worker threads. Each live agent is bound to
/// exactly one event queue by its dispatcher binder.
pub trait EventQueue: Send + Sync {
    /// Enqueue one demand.
    fn push(&self, demand: ExecutionDemand);
}

/// Shared handle to an event queue.
pub type EventQueueRef = Arc<dyn EventQueue>;

/// Optional environment-level hook wrapping every event queue handed to
/// an agent at bind time. Lets observability layers intercept demand
/// flow without touching dispatchers.
pub trait EventQueueHook: Send + Sync {
    /// Called when `agent` is bound; the returned queue is what the
    /// agent will actually push into.
    fn on_bind(&self, agent: AgentId, queue: EventQueueRef) -> EventQueueRef;

    /// Called when `agent` is unbound.
    fn on_unbind(&self, agent: AgentId);
}
