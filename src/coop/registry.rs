// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use super::runtime::{CoopAgent, CoopHandle, CoopRuntime};
use super::{Coop, CoopError, DeregReason};
use crate::agent::base::STATUS_RUNNING;
use crate::agent::runtime::AgentRuntime;
use crate::dispatcher::event_queue::DemandKind;
use crate::env::Environment;
use crate::util::CoopId;

#[derive(Default)]
struct RegistryInner {
    coops: HashMap<CoopId, Arc<CoopRuntime>>,
    names: HashMap<String, CoopId>,
    closed: bool,
}

/// Registry of live cooperations. One mutex guards structural changes;
/// agent lifecycle work and notifications happen outside of it.
#[derive(Default)]
pub(crate) struct CoopRegistry {
    inner: Mutex<RegistryInner>,
}

impl CoopRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of live cooperations.
    pub(crate) fn coop_count(&self) -> usize {
        self.inner.lock().coops.len()
    }

    /// Number of agents across all live cooperations.
    pub(crate) fn agent_count(&self) -> usize {
        self.inner
            .lock()
            .coops
            .values()
            .map(|c| c.agent_count())
            .sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().coops.is_empty()
    }

    /// Close the registry for new registrations and return the live
    /// cooperations for shutdown deregistration.
    pub(crate) fn close_and_snapshot(&self) -> Vec<Arc<CoopRuntime>> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.coops.values().cloned().collect()
    }

    pub(crate) fn remove(&self, id: CoopId, name: &str) {
        let mut inner = self.inner.lock();
        inner.coops.remove(&id);
        inner.names.remove(name);
    }

    /// Atomic registration: preallocate dispatcher resources for every
    /// agent, run `so_define_agent` for every agent, then bind and
    /// start all of them. Any failure before the binding phase rolls
    /// everything back; the binding phase itself cannot fail.
    pub(crate) fn register(&self, env: &Environment, coop: Coop) -> Result<CoopHandle, CoopError> {
        if coop.agents.is_empty() {
            return Err(CoopError::EmptyCoop);
        }

        let Coop {
            env: _,
            name,
            parent,
            default_binder,
            agents,
            reg_notificators,
            dereg_notificators,
            exception_reaction,
        } = coop;

        let id = env.next_coop_id();
        let name = name.unwrap_or_else(|| format!("__coop_{}", id.raw()));

        let agents: Vec<CoopAgent> = agents
            .into_iter()
            .map(|(boxed, binder)| CoopAgent {
                runtime: AgentRuntime::new(boxed),
                binder: binder.unwrap_or_else(|| Arc::clone(&default_binder)),
            })
            .collect();

        let parent_runtime = match &parent {
            Some(handle) => Some(handle.runtime().ok_or(CoopError::ParentUnavailable)?),
            None => None,
        };

        let runtime = CoopRuntime::new(
            id,
            name.clone(),
            env.clone(),
            parent_runtime.as_ref(),
            agents,
            reg_notificators,
            dereg_notificators,
            exception_reaction,
        );

        // Structural insertion under the registry lock.
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(CoopError::EnvStopInProgress);
            }
            if inner.names.contains_key(&name) {
                return Err(CoopError::CoopAlreadyRegistered { name });
            }
            if let Some(parent) = &parent_runtime {
                if !parent.add_child(&runtime) {
                    return Err(CoopError::ParentUnavailable);
                }
            }
            inner.coops.insert(id, Arc::clone(&runtime));
            inner.names.insert(name.clone(), id);
        }

        // Phase 1: preallocate dispatcher resources (rollbackable).
        for (i, agent) in runtime.agents.iter().enumerate() {
            if let Err(source) = agent.binder.preallocate(&agent.runtime) {
                for prior in &runtime.agents[..i] {
                    prior.binder.undo_preallocation(&prior.runtime);
                }
                self.rollback_registration(&runtime, parent_runtime.as_ref());
                return Err(CoopError::BindingFailed { source });
            }
        }

        // Phase 2: define agents; deliveries to fresh subscriptions are
        // buffered until the binding completes.
        for agent in &runtime.agents {
            agent.runtime.shared().start_buffering();
        }
        for (i, agent) in runtime.agents.iter().enumerate() {
            if let Err(error) = agent.runtime.call_define() {
                for defined in &runtime.agents[..=i] {
                    defined.runtime.rollback_define();
                }
                for prepared in &runtime.agents {
                    prepared.binder.undo_preallocation(&prepared.runtime);
                    prepared.runtime.shared().detach_queue();
                }
                self.rollback_registration(&runtime, parent_runtime.as_ref());
                return Err(CoopError::AgentDefinitionFailed {
                    reason: error.to_string(),
                });
            }
        }

        // Phase 3: bind and start. Infallible by construction.
        for agent in &runtime.agents {
            agent.runtime.shared().set_status(STATUS_RUNNING);
            let queue = agent.binder.bind(&agent.runtime);
            let queue = env.wrap_event_queue(agent.runtime.id(), queue);
            let start = agent.runtime.lifecycle_demand(DemandKind::EvtStart);
            agent.runtime.shared().bind_queue(queue, start);
        }

        runtime.fire_reg_notifications();
        Ok(runtime.handle())
    }

    fn rollback_registration(&self, runtime: &Arc<CoopRuntime>, parent: Option<&Arc<CoopRuntime>>) {
        if let Some(parent) = parent {
            parent.rollback_child(runtime.id());
        }
        let mut inner = self.inner.lock();
        inner.coops.remove(&runtime.id());
        inner.names.remove(runtime.name().as_str());
    }

    /// Request deregistration through a handle.
    pub(crate) fn deregister(
        &self,
        handle: &CoopHandle,
        reason: DeregReason,
    ) -> Result<(), CoopError> {
        let runtime = handle.runtime().ok_or(CoopError::CoopNotFound)?;
        runtime.initiate_deregistration(reason);
        Ok(())
    }
}
