// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::message::{MessageRef, MsgTypeId};
use crate::util::{AgentId, MboxId};

/// Shared handle to any message box implementation.
pub type MboxRef = Arc<dyn AbstractMbox>;

/// Shared handle to a message sink (the subscriber side of an mbox).
pub type MessageSinkRef = Arc<dyn MessageSink>;

/// Per-subscriber delivery predicate. Receives the payload the
/// subscription is matched on (envelopes are unwrapped first); `true`
/// lets the message through.
pub type DeliveryFilterFn = Arc<dyn Fn(&MessageRef) -> bool + Send + Sync>;

/// Initial value of the redirection-depth counter every fresh send
/// starts with. Each redirect or transform of the same logical message
/// decrements it; at zero the delivery fails instead of redirecting
/// further.
pub const DEFAULT_REDIRECTION_DEPTH: u32 = 32;

/// Fan-out discipline of an mbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MboxType {
    /// Many producers, many consumers: arbitrary subscribers.
    MultiProducerMultiConsumer,
    /// Many producers, one consumer: bound to a single owning agent.
    MultiProducerSingleConsumer,
}

/// Errors of mbox structural operations (subscribe, filters).
#[derive(Debug, Error)]
pub enum MboxError {
    /// A second agent tried to subscribe to a single-consumer mbox.
    #[error("{mbox} is single-consumer and belongs to {owner}")]
    SingleConsumerViolation {
        /// The violated mbox.
        mbox: MboxId,
        /// The owning agent.
        owner: AgentId,
    },

    /// The mbox implementation does not support the operation (for
    /// example, subscribing to the sending facade of a message chain).
    #[error("operation `{operation}` is not supported by {mbox}")]
    NotSupported {
        /// The mbox the operation was attempted on.
        mbox: MboxId,
        /// Name of the rejected operation.
        operation: &'static str,
    },
}

/// Errors surfaced to senders by `deliver`.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A mutable message would have reached more than one subscriber.
    /// Nothing was delivered.
    #[error("mutable message has more than one subscriber at {mbox}")]
    MutableMessageMultipleSubscribers {
        /// The mbox the delivery went through.
        mbox: MboxId,
    },

    /// The redirection-depth counter was exhausted while an overflow
    /// reaction tried to redirect or transform the message.
    #[error("message redirection is too deep at {mbox}")]
    RedirectionTooDeep {
        /// The mbox at which the counter reached zero.
        mbox: MboxId,
    },

    /// The target message chain is closed for new messages.
    #[error("message chain {mbox} is closed")]
    ChainClosed {
        /// Id of the chain's sending facade.
        mbox: MboxId,
    },

    /// A bounded message chain is full and its overflow reaction is to
    /// report the failure to the sender.
    #[error("message chain {mbox} is full")]
    ChainOverflow {
        /// Id of the chain's sending facade.
        mbox: MboxId,
    },
}

/// A message box: a named or anonymous channel messages are sent into.
///
/// Implementations differ in fan-out (MPMC vs MPSC) and in backing
/// machinery (plain mbox vs the sending facade of a message chain), but
/// all of them route through the same `deliver` entry point, so
/// delivery filters, message limits and envelopes behave uniformly.
pub trait AbstractMbox: Send + Sync {
    /// Process-unique id of this mbox.
    fn id(&self) -> MboxId;

    /// Fan-out discipline.
    fn mbox_type(&self) -> MboxType;

    /// Human-readable name used in traces and errors.
    fn name(&self) -> String;

    /// Register `sink` as a subscriber for `msg_type`.
    fn subscribe_event_handler(
        &self,
        msg_type: MsgTypeId,
        sink: MessageSinkRef,
    ) -> Result<(), MboxError>;

    /// Remove the subscription of `sink_id` for `msg_type`. Idempotent.
    fn unsubscribe_event_handler(&self, msg_type: MsgTypeId, sink_id: AgentId);

    /// Attach a delivery filter for `(msg_type, sink_id)`. Replaces a
    /// previously set filter. A filter may be set before the actual
    /// subscription is made.
    fn set_delivery_filter(
        &self,
        msg_type: MsgTypeId,
        sink_id: AgentId,
        filter: DeliveryFilterFn,
    ) -> Result<(), MboxError>;

    /// Remove the delivery filter for `(msg_type, sink_id)`. Idempotent.
    fn drop_delivery_filter(&self, msg_type: MsgTypeId, sink_id: AgentId);

    /// Deliver a message to every accepting subscriber.
    ///
    /// `redirection_deep` is the remaining redirection budget of this
    /// logical message; pass [`DEFAULT_REDIRECTION_DEPTH`] for a fresh
    /// send.
    fn deliver(&self, message: MessageRef, redirection_deep: u32) -> Result<(), DeliveryError>;
}

/// The subscriber side: something an mbox can push a message at.
///
/// Agents are the usual sinks; the sink applies the agent's message
/// limits and turns the message into an execution demand on the agent's
/// event queue.
pub trait MessageSink: Send + Sync {
    /// Stable id of the sink, used as the subscription key on the mbox.
    fn sink_id(&self) -> AgentId;

    /// Accept one message from `mbox_id` with the given remaining
    /// redirection budget.
    fn push_event(
        &self,
        mbox_id: MboxId,
        message: MessageRef,
        redirection_deep: u32,
    ) -> Result<(), DeliveryError>;
}
