//! Cooperation subsystem: atomic group registration and deregistration
//! of agents with parent/child lifetime coupling.

pub(crate) mod registry;
pub(crate) mod runtime;

pub use runtime::CoopHandle;
pub(crate) use runtime::CoopRuntime;

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::agent::base::AgentBase;
use crate::agent::{Agent, ExceptionReaction};
use crate::dispatcher::binder::{DispBinderRef, DispatcherError};
use crate::env::Environment;

/// Why a cooperation was (or is being) deregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregReason {
    /// Explicit deregistration by user code.
    Normal,
    /// The environment is shutting down.
    Shutdown,
    /// A parent cooperation is being deregistered.
    ParentDeregistration,
    /// An agent's handler error resolved to
    /// [`ExceptionReaction::DeregisterCoop`].
    UnhandledException,
    /// Application-defined reason code.
    User(u32),
}

/// Callback invoked right after a cooperation is registered.
pub type RegNotificator = Arc<dyn Fn(&Environment, &CoopHandle) + Send + Sync>;

/// Callback invoked after a cooperation is fully deregistered.
pub type DeregNotificator = Arc<dyn Fn(&Environment, &CoopHandle, DeregReason) + Send + Sync>;

/// Environment-wide listener of cooperation lifecycle events.
pub trait CoopListener: Send + Sync {
    /// A cooperation completed registration.
    fn on_registered(&self, coop: &CoopHandle);
    /// A cooperation completed deregistration.
    fn on_deregistered(&self, coop: &CoopHandle, reason: DeregReason);
}

/// Errors of cooperation management.
#[derive(Debug, Error)]
pub enum CoopError {
    /// The cooperation name is already taken.
    #[error("coop `{name}` is already registered")]
    CoopAlreadyRegistered {
        /// The duplicated name.
        name: String,
    },

    /// The handle does not refer to a live cooperation.
    #[error("coop not found")]
    CoopNotFound,

    /// Registration attempted after `stop()`.
    #[error("environment stop is already in progress")]
    EnvStopInProgress,

    /// A cooperation must contain at least one agent.
    #[error("coop has no agents")]
    EmptyCoop,

    /// The parent cooperation is gone or already deregistering.
    #[error("parent coop is not available for new children")]
    ParentUnavailable,

    /// `so_define_agent` of one of the agents failed; the registration
    /// was rolled back.
    #[error("agent definition failed: {reason}")]
    AgentDefinitionFailed {
        /// Stringified error from the agent.
        reason: String,
    },

    /// Dispatcher resource preallocation failed; the registration was
    /// rolled back.
    #[error("dispatcher binding failed")]
    BindingFailed {
        /// The underlying dispatcher error.
        #[source]
        source: DispatcherError,
    },
}

/// A cooperation under construction: agents plus their binders, not yet
/// registered.
///
/// Obtained from [`Environment::make_coop`]; populated with agents and
/// handed to [`Environment::register_coop`], which either atomically
/// activates every agent or leaves no trace.
///
/// # Example
/// ```rust,ignore
/// let mut coop = env.make_coop();
/// let base = coop.new_agent_base();
/// let mbox = base.so_direct_mbox();
/// coop.add_agent(Worker::new(base));
/// let handle = env.register_coop(coop)?;
/// ```
pub struct Coop {
    pub(crate) env: Environment,
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<CoopHandle>,
    pub(crate) default_binder: DispBinderRef,
    pub(crate) agents: Vec<(Box<dyn Agent>, Option<DispBinderRef>)>,
    pub(crate) reg_notificators: Vec<RegNotificator>,
    pub(crate) dereg_notificators: Vec<DeregNotificator>,
    pub(crate) exception_reaction: ExceptionReaction,
}

impl Coop {
    pub(crate) fn new(env: Environment, default_binder: DispBinderRef) -> Self {
        Self {
            env,
            name: None,
            parent: None,
            default_binder,
            agents: Vec::new(),
            reg_notificators: Vec::new(),
            dereg_notificators: Vec::new(),
            exception_reaction: ExceptionReaction::Inherit,
        }
    }

    /// Give the cooperation an explicit (process-unique) name.
    /// Anonymous cooperations get a generated one.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Make this cooperation a child of `parent`: it will be
    /// deregistered before the parent's deregistration completes.
    pub fn set_parent(&mut self, parent: CoopHandle) {
        self.parent = Some(parent);
    }

    /// Exception reaction for agents of this coop that answer
    /// [`ExceptionReaction::Inherit`].
    pub fn set_exception_reaction(&mut self, reaction: ExceptionReaction) {
        self.exception_reaction = reaction;
    }

    /// Create the runtime half for an agent that will be added to this
    /// cooperation.
    pub fn new_agent_base(&self) -> AgentBase {
        AgentBase::new(self.env.clone())
    }

    /// Add an agent bound to the cooperation's default dispatcher.
    pub fn add_agent<A: Agent>(&mut self, agent: A) {
        self.agents.push((Box::new(agent), None));
    }

    /// Add an agent with an individual dispatcher binder.
    pub fn add_agent_with_binder<A: Agent>(&mut self, agent: A, binder: DispBinderRef) {
        self.agents.push((Box::new(agent), Some(binder)));
    }

    /// Register a callback fired right after successful registration.
    pub fn add_reg_notificator(
        &mut self,
        notificator: impl Fn(&Environment, &CoopHandle) + Send + Sync + 'static,
    ) {
        self.reg_notificators.push(Arc::new(notificator));
    }

    /// Register a callback fired after the cooperation is fully
    /// deregistered, with the deregistration reason.
    pub fn add_dereg_notificator(
        &mut self,
        notificator: impl Fn(&Environment, &CoopHandle, DeregReason) + Send + Sync + 'static,
    ) {
        self.dereg_notificators.push(Arc::new(notificator));
    }
}
