// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::sync::{OnceLock, Weak};

// Layer 2: Third-party crate imports
use parking_lot::RwLock;

// Layer 3: Internal module imports
use super::traits::{
    AbstractMbox, DeliveryError, DeliveryFilterFn, MboxError, MboxType, MessageSink,
    MessageSinkRef,
};
use crate::agent::state::TimeLimitElapsed;
use crate::message::{MessageRef, MsgTypeId};
use crate::msg_tracing::{TraceAction, TraceSink};
use crate::util::{AgentId, MboxId};

/// Owner-side subscription data for one message type.
#[derive(Default)]
struct OwnerSubscription {
    subscribed: bool,
    filter: Option<DeliveryFilterFn>,
}

impl OwnerSubscription {
    fn is_empty(&self) -> bool {
        !self.subscribed && self.filter.is_none()
    }
}

/// Multi-producer/single-consumer mbox tied to one owning agent.
///
/// Construction fixes the owner; only that agent can ever subscribe.
/// The sink reference is attached lazily when the owning agent's
/// runtime is created, which is why it lives behind a `OnceLock`.
pub(crate) struct DirectMbox {
    id: MboxId,
    owner_id: AgentId,
    owner: OnceLock<Weak<dyn MessageSink>>,
    subscriptions: RwLock<BTreeMap<MsgTypeId, OwnerSubscription>>,
    tracer: TraceSink,
}

impl DirectMbox {
    pub(crate) fn new(id: MboxId, owner_id: AgentId, tracer: TraceSink) -> Self {
        Self {
            id,
            owner_id,
            owner: OnceLock::new(),
            subscriptions: RwLock::new(BTreeMap::new()),
            tracer,
        }
    }

    /// Attach the owning sink. Called once, when the agent runtime is
    /// created; repeated calls are ignored.
    pub(crate) fn attach_owner(&self, owner: Weak<dyn MessageSink>) {
        let _ = self.owner.set(owner);
    }

    fn owner_sink(&self) -> Option<MessageSinkRef> {
        self.owner.get().and_then(Weak::upgrade)
    }
}

impl AbstractMbox for DirectMbox {
    fn id(&self) -> MboxId {
        self.id
    }

    fn mbox_type(&self) -> MboxType {
        MboxType::MultiProducerSingleConsumer
    }

    fn name(&self) -> String {
        format!(
            "<mbox:type=MPSC:id={}:owner={}>",
            self.id.raw(),
            self.owner_id.raw()
        )
    }

    fn subscribe_event_handler(
        &self,
        msg_type: MsgTypeId,
        sink: MessageSinkRef,
    ) -> Result<(), MboxError> {
        if sink.sink_id() != self.owner_id {
            return Err(MboxError::SingleConsumerViolation {
                mbox: self.id,
                owner: self.owner_id,
            });
        }
        self.subscriptions
            .write()
            .entry(msg_type)
            .or_default()
            .subscribed = true;
        Ok(())
    }

    fn unsubscribe_event_handler(&self, msg_type: MsgTypeId, sink_id: AgentId) {
        if sink_id != self.owner_id {
            return;
        }
        let mut subs = self.subscriptions.write();
        if let Some(entry) = subs.get_mut(&msg_type) {
            entry.subscribed = false;
            if entry.is_empty() {
                subs.remove(&msg_type);
            }
        }
    }

    fn set_delivery_filter(
        &self,
        msg_type: MsgTypeId,
        sink_id: AgentId,
        filter: DeliveryFilterFn,
    ) -> Result<(), MboxError> {
        if sink_id != self.owner_id {
            return Err(MboxError::SingleConsumerViolation {
                mbox: self.id,
                owner: self.owner_id,
            });
        }
        self.subscriptions
            .write()
            .entry(msg_type)
            .or_default()
            .filter = Some(filter);
        Ok(())
    }

    fn drop_delivery_filter(&self, msg_type: MsgTypeId, sink_id: AgentId) {
        if sink_id != self.owner_id {
            return;
        }
        let mut subs = self.subscriptions.write();
        if let Some(entry) = subs.get_mut(&msg_type) {
            entry.filter = None;
            if entry.is_empty() {
                subs.remove(&msg_type);
            }
        }
    }

    fn deliver(&self, message: MessageRef, redirection_deep: u32) -> Result<(), DeliveryError> {
        let msg_type = message.type_tag();

        // State time-limit signals are a runtime-internal service type;
        // they bypass the subscription table so an armed time limit
        // works in any state.
        if msg_type == MsgTypeId::immutable::<TimeLimitElapsed>() {
            if let Some(sink) = self.owner_sink() {
                return sink.push_event(self.id, message, redirection_deep);
            }
            return Ok(());
        }

        let accepted = {
            let subs = self.subscriptions.read();
            match subs.get(&msg_type) {
                Some(entry) if entry.subscribed => match &entry.filter {
                    None => true,
                    Some(filter) => message
                        .for_inspection()
                        .map(|payload| filter(&payload))
                        .unwrap_or(false),
                },
                _ => false,
            }
        };

        if !accepted {
            self.tracer.emit(
                self.id,
                || self.name(),
                msg_type,
                Some(self.owner_id),
                TraceAction::NoSubscribers,
            );
            return Ok(());
        }

        match self.owner_sink() {
            Some(sink) => sink.push_event(self.id, message, redirection_deep),
            None => {
                self.tracer.emit(
                    self.id,
                    || self.name(),
                    msg_type,
                    Some(self.owner_id),
                    TraceAction::DroppedDetached,
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mbox::null_sink::CountingSink;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Note {
        text: &'static str,
    }

    fn owned_mbox(owner: &Arc<CountingSink>) -> DirectMbox {
        let m = DirectMbox::new(MboxId::from_raw(2), owner.sink_id(), TraceSink::default());
        let weak_concrete = Arc::downgrade(owner);
        let weak: Weak<dyn MessageSink> = weak_concrete;
        m.attach_owner(weak);
        m
    }

    #[test]
    fn test_foreign_subscription_is_rejected() {
        let owner = CountingSink::shared(AgentId::from_raw(5));
        let stranger = CountingSink::shared(AgentId::from_raw(6));
        let m = owned_mbox(&owner);

        let r = m.subscribe_event_handler(MsgTypeId::immutable::<Note>(), stranger);
        assert!(matches!(r, Err(MboxError::SingleConsumerViolation { .. })));
    }

    #[test]
    fn test_delivery_requires_subscription() {
        let owner = CountingSink::shared(AgentId::from_raw(5));
        let m = owned_mbox(&owner);

        m.deliver(MessageRef::message(Note { text: "a" }), 32)
            .unwrap();
        assert_eq!(owner.received(), 0);

        let sink: MessageSinkRef = Arc::clone(&owner) as MessageSinkRef;
        m.subscribe_event_handler(MsgTypeId::immutable::<Note>(), sink)
            .unwrap();
        m.deliver(MessageRef::message(Note { text: "b" }), 32)
            .unwrap();
        assert_eq!(owner.received(), 1);
    }

    #[test]
    fn test_filter_applies_to_owner() {
        let owner = CountingSink::shared(AgentId::from_raw(5));
        let m = owned_mbox(&owner);
        let tag = MsgTypeId::immutable::<Note>();

        let sink: MessageSinkRef = Arc::clone(&owner) as MessageSinkRef;
        m.subscribe_event_handler(tag, sink).unwrap();
        m.set_delivery_filter(
            tag,
            AgentId::from_raw(5),
            Arc::new(|m: &MessageRef| {
                m.downcast_ref::<Note>().map(|n| n.text == "keep").unwrap_or(false)
            }),
        )
        .unwrap();

        m.deliver(MessageRef::message(Note { text: "drop" }), 32)
            .unwrap();
        m.deliver(MessageRef::message(Note { text: "keep" }), 32)
            .unwrap();
        assert_eq!(owner.received(), 1);
    }
}
