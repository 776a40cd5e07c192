// Layer 1: Standard library imports
use std::any::Any;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::base::AgentBase;
use super::handler::HandlerResult;

/// What to do when a handler returns an error.
///
/// Resolution order for [`Inherit`](ExceptionReaction::Inherit):
/// agent → cooperation → parent cooperations → environment default.
///
/// Agents bound to dispatchers that may run their handlers on several
/// threads at once may only use `Abort` or `Ignore`; any other resolved
/// value is a fatal configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionReaction {
    /// Terminate the process.
    Abort,
    /// Initiate environment shutdown.
    ShutdownEnvironment,
    /// Deregister the agent's cooperation with an
    /// unhandled-exception reason.
    DeregisterCoop,
    /// Log the error and continue.
    Ignore,
    /// Defer to the cooperation (and ultimately the environment).
    Inherit,
}

/// An agent: the user-defined entity owning subscriptions and a state
/// machine.
///
/// Implementors embed an [`AgentBase`] (obtained from the cooperation
/// they are added to) and expose it through `so_base`/`so_base_mut`;
/// everything else has a default.
///
/// # Lifecycle
///
/// ```text
/// construction -> so_define_agent -> so_evt_start -> handlers* -> so_evt_finish
/// ```
///
/// All hooks and handlers run on the agent's worker thread(s), never on
/// the caller of `register_coop`.
///
/// # Example
/// ```rust,ignore
/// struct Greeter {
///     so: AgentBase,
/// }
///
/// impl Agent for Greeter {
///     fn so_base(&self) -> &AgentBase { &self.so }
///     fn so_base_mut(&mut self) -> &mut AgentBase { &mut self.so }
///
///     fn so_define_agent(&mut self) -> HandlerResult {
///         let mbox = self.so_base().so_direct_mbox();
///         self.so_subscribe(&mbox).event(|a: &mut Self, m: &Hello| {
///             println!("hello, {}", m.name);
///         })?;
///         Ok(())
///     }
/// }
/// ```
pub trait Agent: Any + Send + Sync + 'static {
    /// The runtime half of the agent.
    fn so_base(&self) -> &AgentBase;

    /// The runtime half of the agent, mutably.
    fn so_base_mut(&mut self) -> &mut AgentBase;

    /// Called once during cooperation registration, before the agent is
    /// reachable by messages. The place to create subscriptions and
    /// finish the state tree.
    fn so_define_agent(&mut self) -> HandlerResult {
        Ok(())
    }

    /// Called once after registration completes, as the very first
    /// demand from the agent's event queue.
    fn so_evt_start(&mut self) -> HandlerResult {
        Ok(())
    }

    /// Called once after deregistration is requested, as the last
    /// demand the agent executes.
    fn so_evt_finish(&mut self) -> HandlerResult {
        Ok(())
    }

    /// Reaction to errors returned from this agent's handlers.
    fn so_exception_reaction(&self) -> ExceptionReaction {
        ExceptionReaction::Inherit
    }
}
