// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::traits::Agent;
use crate::message::MessageRef;

/// Error escaping a handler. Plays the role exceptions play in other
/// runtimes: it is routed through the agent's exception reaction.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Declared thread safety of an event handler.
///
/// A `Safe` handler promises not to mutate the agent and may run in
/// parallel with other `Safe` handlers of the same agent on dispatchers
/// that support it. `NotSafe` handlers are mutually exclusive with every
/// other handler of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSafety {
    /// Exclusive access to the agent (`&mut`); the default.
    NotSafe,
    /// Shared access to the agent (`&`); may run concurrently.
    Safe,
}

pub(crate) type ExclusiveFn = Arc<dyn Fn(&mut dyn Agent, &MessageRef) -> HandlerResult + Send + Sync>;
pub(crate) type SharedFn = Arc<dyn Fn(&dyn Agent, &MessageRef) -> HandlerResult + Send + Sync>;

/// The stored, type-erased form of a handler. The access mode is part
/// of the type: exclusive handlers run under the agent's write lock,
/// thread-safe ones under the read lock.
#[derive(Clone)]
pub(crate) enum HandlerInvoker {
    Exclusive(ExclusiveFn),
    ThreadSafe(SharedFn),
}

/// A subscribed event handler together with its thread-safety flag.
#[derive(Clone)]
pub struct EventHandler {
    pub(crate) invoker: HandlerInvoker,
}

impl EventHandler {
    pub(crate) fn exclusive(f: ExclusiveFn) -> Self {
        Self {
            invoker: HandlerInvoker::Exclusive(f),
        }
    }

    pub(crate) fn thread_safe(f: SharedFn) -> Self {
        Self {
            invoker: HandlerInvoker::ThreadSafe(f),
        }
    }

    /// Declared thread safety of this handler.
    pub fn thread_safety(&self) -> ThreadSafety {
        match &self.invoker {
            HandlerInvoker::Exclusive(_) => ThreadSafety::NotSafe,
            HandlerInvoker::ThreadSafe(_) => ThreadSafety::Safe,
        }
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventHandler({:?})", self.thread_safety())
    }
}
