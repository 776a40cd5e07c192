// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use super::event_queue::EventQueueRef;
use crate::agent::runtime::AgentRuntime;

/// Errors of dispatcher construction and agent binding.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// An OS worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    ThreadSpawnFailed(#[from] std::io::Error),

    /// The dispatcher is shutting down and accepts no new agents.
    #[error("dispatcher is already stopped")]
    DispatcherStopped,
}

/// Adapter between one agent and one dispatcher.
///
/// Binding is a two-phase commit: `preallocate` reserves whatever the
/// dispatcher needs for the agent and may fail; registration rolls a
/// failure back with `undo_preallocation`. After every agent of a
/// cooperation preallocated successfully, `bind` hands out the event
/// queue and cannot fail. `unbind` releases the resources during final
/// deregistration.
pub trait DispBinder: Send + Sync {
    /// Reserve per-agent resources (queues, threads). May fail.
    fn preallocate(&self, agent: &Arc<AgentRuntime>) -> Result<(), DispatcherError>;

    /// Release resources reserved by a `preallocate` whose registration
    /// failed afterwards.
    fn undo_preallocation(&self, agent: &Arc<AgentRuntime>);

    /// Produce the event queue the agent will push demands into.
    /// Must be preceded by a successful `preallocate`.
    fn bind(&self, agent: &Arc<AgentRuntime>) -> EventQueueRef;

    /// Release the agent's resources after it finished.
    fn unbind(&self, agent: &Arc<AgentRuntime>);
}

/// Shared handle to a dispatcher binder.
pub type DispBinderRef = Arc<dyn DispBinder>;

/// Abort helper for broken bind invariants: a `bind` without a
/// preceding `preallocate` cannot be rolled back and is fatal.
pub(crate) fn fatal_bind_violation(context: &'static str) -> ! {
    tracing::error!(context, "agent bound without preallocation");
    std::process::abort();
}
