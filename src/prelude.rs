//! Convenience re-exports for the common 90% of user code.
//!
//! ```rust
//! use agentry::prelude::*;
//! ```

pub use crate::agent::{
    Agent, AgentBase, AgentExt, ExceptionReaction, HandlerResult, State, ThreadSafety,
};
pub use crate::coop::{Coop, CoopHandle, DeregReason};
pub use crate::env::{EnvParams, Environment};
pub use crate::limit::MessageLimits;
pub use crate::mbox::{send, send_mutable, send_signal, AbstractMbox, MboxRef};
pub use crate::mchain::{receive, MchainParams, MsgHandlerSet};
pub use crate::message::{Message, MessageRef, Signal};
pub use crate::util::Priority;
