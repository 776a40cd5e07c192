//! Agent kernel: lifecycle, hierarchical state machine, subscription
//! surface and demand execution.

pub mod base;
pub mod handler;
pub mod runtime;
pub mod state;
pub mod subscribing;
pub mod traits;

pub use base::AgentBase;
pub use runtime::AgentRuntime;
pub use handler::{EventHandler, HandlerError, HandlerResult, ThreadSafety};
pub use state::{State, StateError};
pub use subscribing::{AgentExt, SubscriptionBuilder};
pub use traits::{Agent, ExceptionReaction};
