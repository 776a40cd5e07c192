//! Optional message-delivery tracing.
//!
//! When a tracer is installed in the environment parameters, every mbox
//! delivery path reports structured [`TraceEvent`]s: successful pushes,
//! drops with their reasons, filter rejections and overload reactions.
//! The runtime never interprets the events; it only emits them.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};

// Layer 3: Internal module imports
use crate::message::MsgTypeId;
use crate::util::{AgentId, MboxId};

/// What happened to a message at a particular tracing point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceAction {
    /// A demand was pushed into a subscriber's event queue.
    PushedToQueue,
    /// Delivery found no subscriber for the message type.
    NoSubscribers,
    /// A delivery filter rejected the message for one subscriber.
    RejectedByFilter,
    /// The envelope suppressed the handler invocation for one subscriber.
    DiscardedByEnvelope,
    /// An overflow limit dropped the message.
    OverlimitDrop,
    /// An overflow limit redirected the message to another mbox.
    OverlimitRedirect,
    /// An overflow limit transformed the message.
    OverlimitTransform,
    /// The receiving agent had no handler in its current state.
    DroppedNoHandler,
    /// The receiving agent already finished; the demand was discarded.
    DroppedAgentFinished,
    /// The receiving agent was not attached to any event queue.
    DroppedDetached,
}

impl fmt::Display for TraceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TraceAction::PushedToQueue => "pushed_to_queue",
            TraceAction::NoSubscribers => "no_subscribers",
            TraceAction::RejectedByFilter => "rejected_by_filter",
            TraceAction::DiscardedByEnvelope => "discarded_by_envelope",
            TraceAction::OverlimitDrop => "overlimit_drop",
            TraceAction::OverlimitRedirect => "overlimit_redirect",
            TraceAction::OverlimitTransform => "overlimit_transform",
            TraceAction::DroppedNoHandler => "dropped_no_handler",
            TraceAction::DroppedAgentFinished => "dropped_agent_finished",
            TraceAction::DroppedDetached => "dropped_detached",
        };
        f.write_str(text)
    }
}

/// One structured tracing record.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Wall-clock moment the event was produced.
    pub when: DateTime<Utc>,
    /// Id of the mbox the message went through.
    pub mbox_id: MboxId,
    /// Human-readable mbox name.
    pub mbox_name: String,
    /// Type tag of the message.
    pub msg_type: MsgTypeId,
    /// The subscriber concerned, when the event is per-subscriber.
    pub sink: Option<AgentId>,
    /// What happened.
    pub action: TraceAction,
}

/// Receiver of delivery trace events. Implementations must be cheap:
/// they run inline on delivery paths.
pub trait MsgTracer: Send + Sync {
    /// Consume one trace event.
    fn trace(&self, event: TraceEvent);
}

/// Internal handle every mbox carries; no-op when tracing is off.
#[derive(Clone, Default)]
pub(crate) struct TraceSink(Option<Arc<dyn MsgTracer>>);

impl TraceSink {
    pub(crate) fn new(tracer: Option<Arc<dyn MsgTracer>>) -> Self {
        Self(tracer)
    }

    pub(crate) fn emit(
        &self,
        mbox_id: MboxId,
        mbox_name: impl FnOnce() -> String,
        msg_type: MsgTypeId,
        sink: Option<AgentId>,
        action: TraceAction,
    ) {
        if let Some(tracer) = &self.0 {
            tracer.trace(TraceEvent {
                when: Utc::now(),
                mbox_id,
                mbox_name: mbox_name(),
                msg_type,
                sink,
                action,
            });
        }
    }
}
