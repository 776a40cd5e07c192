//! # agentry - In-Process Actor-Oriented Runtime
//!
//! Agentry hosts **agents** (actor-like entities with hierarchical
//! state machines and message handlers), routes messages between them
//! through named or anonymous **mboxes**, and runs their handlers on a
//! configurable set of **dispatchers** backed by plain OS threads.
//! Handlers are synchronous: no async/await, no hidden suspension
//! points.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use agentry::prelude::*;
//!
//! #[derive(Debug)]
//! struct Hello {
//!     name: String,
//! }
//!
//! struct Greeter {
//!     so: AgentBase,
//! }
//!
//! impl Agent for Greeter {
//!     fn so_base(&self) -> &AgentBase {
//!         &self.so
//!     }
//!
//!     fn so_base_mut(&mut self) -> &mut AgentBase {
//!         &mut self.so
//!     }
//!
//!     fn so_define_agent(&mut self) -> HandlerResult {
//!         self.so_subscribe_self().event(|agent: &mut Self, msg: &Hello| {
//!             println!("hello, {}", msg.name);
//!             agent.so_base().so_environment().stop();
//!         })?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), agentry::EnvError> {
//!     Environment::launch(EnvParams::new(), |env| {
//!         let mut coop = env.make_coop();
//!         let base = coop.new_agent_base();
//!         let mbox = base.so_direct_mbox();
//!         coop.add_agent(Greeter { so: base });
//!         env.register_coop(coop)?;
//!         agentry::send(&mbox, Hello { name: "world".into() })?;
//!         Ok(())
//!     })
//! }
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`agent`] - Agent trait, state machine, subscriptions, demand execution
//! - [`message`] - Payload handles, type tags, signals, envelopes
//! - [`mbox`] - MPMC/MPSC message boxes, named registry, delivery filters
//! - [`subscription`] - Pluggable per-agent subscription storages
//! - [`limit`] - Per-message-type overload control
//!
//! ## Scheduling
//! - [`dispatcher`] - Demand queues, worker threads and the dispatcher variants
//! - [`timer`] - Delayed/periodic delivery via heap, wheel or list engine
//!
//! ## Grouping and hosting
//! - [`coop`] - Atomic registration groups with parent/child coupling
//! - [`env`] - The environment owning every component
//! - [`mchain`] - Passive queues consumed from non-agent threads
//!
//! ## Observability
//! - [`stats`] - Run-time stats distribution
//! - [`msg_tracing`] - Optional delivery tracing
//! - [`util`] - Identifiers and priorities

pub mod agent;
pub mod coop;
pub mod dispatcher;
pub mod env;
pub mod limit;
pub mod mbox;
pub mod mchain;
pub mod message;
pub mod msg_tracing;
pub mod prelude;
pub mod stats;
pub mod subscription;
pub mod timer;
pub mod util;

// Re-export commonly used types
pub use agent::{
    Agent, AgentBase, AgentExt, ExceptionReaction, HandlerError, HandlerResult, State, StateError,
    SubscriptionBuilder, ThreadSafety,
};
pub use coop::{Coop, CoopError, CoopHandle, CoopListener, DeregReason};
pub use dispatcher::{
    ActiveGroupDispatcher, ActiveObjDispatcher, AdvThreadPoolDispatcher, AdvThreadPoolParams,
    BindParams, DispBinder, DispBinderRef, DispatcherError, DispatcherParams, EventQueue,
    EventQueueHook, EventQueueRef, FifoKind, OnePerPrioDispatcher, OneThreadDispatcher, QrrParams,
    QueueLockDefaults, QueueLockFactory, QuotedRoundRobinDispatcher, StrictlyOrderedDispatcher,
    ThreadPoolDispatcher, ThreadPoolParams,
};
pub use env::{EnvConfig, EnvError, EnvParams, Environment, Infrastructure, Layer, StopGuard};
pub use limit::{MessageLimits, TransformedMessage};
pub use mbox::{
    resend, send, send_enveloped, send_mutable, send_signal, AbstractMbox, DeliveryError,
    MboxError, MboxNamespace, MboxRef, MboxType, DEFAULT_REDIRECTION_DEPTH,
};
pub use mchain::{
    receive, receive_bulk, select, CloseMode, ExtractionStatus, MchainError, MchainParams,
    MchainRef, MemoryUsage, MsgHandlerSet, OverflowReaction, ReceiveParams, ReceiveResult,
    SelectCase, SelectParams,
};
pub use message::{Envelope, EnvelopeInvoker, Message, MessageRef, MsgTypeId, Mutability, Signal};
pub use msg_tracing::{MsgTracer, TraceAction, TraceEvent};
pub use stats::{Quantity, StatsController, StatsSource};
pub use subscription::{StorageFactory, SubscriptionError};
pub use timer::{TimerEngineKind, TimerId};
pub use util::{AgentId, CoopId, MboxId, Priority};
