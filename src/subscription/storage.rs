// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::agent::handler::EventHandler;
use crate::agent::state::State;
use crate::mbox::MboxRef;
use crate::message::MsgTypeId;
use crate::util::MboxId;

/// Key of one subscription: `(mbox, message type, state)`.
///
/// The derived ordering (mbox id first, then type, then state) is the
/// canonical ordering used by the sorted storages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey {
    /// The mbox subscribed on.
    pub mbox_id: MboxId,
    /// The message type subscribed for.
    pub msg_type: MsgTypeId,
    /// The agent state the handler is attached to.
    pub state: State,
}

impl SubscriptionKey {
    pub(crate) fn pair(&self) -> (MboxId, MsgTypeId) {
        (self.mbox_id, self.msg_type)
    }
}

/// Errors of subscription management.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// A handler for exactly this `(mbox, type, state)` already exists.
    #[error("handler already registered for {key:?}")]
    HandlerAlreadyRegistered {
        /// The duplicated key.
        key: SubscriptionKey,
    },

    /// An unsubscribe referenced a subscription that does not exist.
    #[error("subscription not found for {key:?}")]
    SubscriptionNotFound {
        /// The missing key.
        key: SubscriptionKey,
    },

    /// Subscribing is only possible for agents already added to a
    /// cooperation (usually from `so_define_agent` or a handler).
    #[error("agent is not attached to a cooperation yet")]
    AgentNotRegistered,

    /// The mbox refused the subscription.
    #[error(transparent)]
    Mbox(#[from] crate::mbox::MboxError),
}

/// One stored subscription, as reported by `query_content`.
pub(crate) struct SubscriptionRecord {
    pub mbox: MboxRef,
    pub key: SubscriptionKey,
    pub handler: EventHandler,
}

/// Result of a successful `create`.
pub(crate) struct CreateOutcome {
    /// True when this is the first subscription of the agent for the
    /// `(mbox, msg_type)` pair: the caller must register the agent as a
    /// sink on the mbox.
    pub first_for_mbox_type: bool,
}

/// Result of a successful `drop_subscription`.
pub(crate) struct DropOutcome {
    /// The mbox of the removed subscription, for sink maintenance.
    pub mbox: MboxRef,
    /// True when no other subscription of the agent remains for the
    /// `(mbox, msg_type)` pair: the caller must remove the agent's sink
    /// from the mbox.
    pub last_for_mbox_type: bool,
}

/// Index from `(mbox, msg_type, state)` to an event handler, owned
/// exclusively by one agent.
///
/// Implementations differ in data structure only; observable semantics
/// are identical. `find_exact` is the hot path; `create` and `drop` are
/// rare and may be logarithmic. State inheritance (walking parent
/// states) happens in the caller, storages do exact lookups.
pub(crate) trait SubscriptionStorage: Send + Sync {
    /// Insert a subscription. Fails when the exact key already exists.
    fn create(
        &mut self,
        mbox: &MboxRef,
        key: SubscriptionKey,
        handler: EventHandler,
    ) -> Result<CreateOutcome, SubscriptionError>;

    /// Remove one subscription.
    fn drop_subscription(&mut self, key: &SubscriptionKey)
        -> Result<DropOutcome, SubscriptionError>;

    /// Remove all states for `(mbox, msg_type)` at once. Returns the
    /// mbox reference if anything was removed (the sink must then be
    /// removed from it).
    fn drop_all_for_mbox_type(&mut self, mbox_id: MboxId, msg_type: MsgTypeId) -> Option<MboxRef>;

    /// Exact lookup for one state.
    fn find_exact(&self, mbox_id: MboxId, msg_type: MsgTypeId, state: State)
        -> Option<EventHandler>;

    /// Snapshot of the whole content (used for migration between
    /// representations and for final cleanup).
    fn query_content(&self) -> Vec<SubscriptionRecord>;

    /// Forget everything without touching the mboxes.
    fn drop_content(&mut self);

    /// Number of stored subscriptions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
