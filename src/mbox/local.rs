// Layer 1: Standard library imports
use std::collections::BTreeMap;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::RwLock;

// Layer 3: Internal module imports
use super::traits::{
    AbstractMbox, DeliveryError, DeliveryFilterFn, MboxError, MboxType, MessageSinkRef,
};
use crate::message::{MessageRef, MsgTypeId, Mutability};
use crate::msg_tracing::{TraceAction, TraceSink};
use crate::util::{AgentId, MboxId};

/// One subscriber slot for a message type.
///
/// A slot can exist with `subscribed == false` when only a delivery
/// filter has been set so far; such a slot never receives messages.
struct SubscriberEntry {
    sink_id: AgentId,
    sink: MessageSinkRef,
    subscribed: bool,
    filter: Option<DeliveryFilterFn>,
}

impl SubscriberEntry {
    fn is_empty(&self) -> bool {
        !self.subscribed && self.filter.is_none()
    }
}

/// The default multi-producer/multi-consumer mbox.
///
/// Subscription changes take the internal lock exclusively; delivery
/// walks the subscriber set under the read lock and releases it before
/// pushing into per-sink event queues, so a slow subscriber never
/// blocks subscription management.
pub(crate) struct LocalMbox {
    id: MboxId,
    subscribers: RwLock<BTreeMap<MsgTypeId, Vec<SubscriberEntry>>>,
    tracer: TraceSink,
}

impl LocalMbox {
    pub(crate) fn new(id: MboxId, tracer: TraceSink) -> Self {
        Self {
            id,
            subscribers: RwLock::new(BTreeMap::new()),
            tracer,
        }
    }
}

impl AbstractMbox for LocalMbox {
    fn id(&self) -> MboxId {
        self.id
    }

    fn mbox_type(&self) -> MboxType {
        MboxType::MultiProducerMultiConsumer
    }

    fn name(&self) -> String {
        format!("<mbox:type=MPMC:id={}>", self.id.raw())
    }

    fn subscribe_event_handler(
        &self,
        msg_type: MsgTypeId,
        sink: MessageSinkRef,
    ) -> Result<(), MboxError> {
        let mut subs = self.subscribers.write();
        let entries = subs.entry(msg_type).or_default();
        match entries.iter_mut().find(|e| e.sink_id == sink.sink_id()) {
            Some(entry) => entry.subscribed = true,
            None => entries.push(SubscriberEntry {
                sink_id: sink.sink_id(),
                sink,
                subscribed: true,
                filter: None,
            }),
        }
        Ok(())
    }

    fn unsubscribe_event_handler(&self, msg_type: MsgTypeId, sink_id: AgentId) {
        let mut subs = self.subscribers.write();
        if let Some(entries) = subs.get_mut(&msg_type) {
            if let Some(entry) = entries.iter_mut().find(|e| e.sink_id == sink_id) {
                entry.subscribed = false;
            }
            entries.retain(|e| !e.is_empty());
            if entries.is_empty() {
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
        let mut subs = self.subscribers.write();
        let entries = subs.entry(msg_type).or_default();
        match entries.iter_mut().find(|e| e.sink_id == sink_id) {
            Some(entry) => entry.filter = Some(filter),
            None => {
                // A filter may arrive before the subscription itself; park
                // it in an inactive slot until the subscription is made.
                entries.push(SubscriberEntry {
                    sink_id,
                    sink: super::null_sink::NullSink::shared(sink_id),
                    subscribed: false,
                    filter: Some(filter),
                });
            }
        }
        Ok(())
    }

    fn drop_delivery_filter(&self, msg_type: MsgTypeId, sink_id: AgentId) {
        let mut subs = self.subscribers.write();
        if let Some(entries) = subs.get_mut(&msg_type) {
            if let Some(entry) = entries.iter_mut().find(|e| e.sink_id == sink_id) {
                entry.filter = None;
            }
            entries.retain(|e| !e.is_empty());
            if entries.is_empty() {
                subs.remove(&msg_type);
            }
        }
    }

    fn deliver(&self, message: MessageRef, redirection_deep: u32) -> Result<(), DeliveryError> {
        let msg_type = message.type_tag();
        let mut targets: Vec<MessageSinkRef> = Vec::new();
        {
            let subs = self.subscribers.read();
            if let Some(entries) = subs.get(&msg_type) {
                let needs_inspection = entries
                    .iter()
                    .any(|e| e.subscribed && e.filter.is_some());
                let inspected = if needs_inspection {
                    message.for_inspection()
                } else {
                    None
                };
                for entry in entries.iter().filter(|e| e.subscribed) {
                    let accepted = match &entry.filter {
                        None => true,
                        Some(filter) => match &inspected {
                            Some(payload) => filter(payload),
                            // Envelope declined to reveal its payload.
                            None => false,
                        },
                    };
                    if accepted {
                        targets.push(Arc::clone(&entry.sink));
                    } else {
                        self.tracer.emit(
                            self.id,
                            || self.name(),
                            msg_type,
                            Some(entry.sink_id),
                            TraceAction::RejectedByFilter,
                        );
                    }
                }
            }
        }

        if targets.is_empty() {
            self.tracer.emit(
                self.id,
                || self.name(),
                msg_type,
                None,
                TraceAction::NoSubscribers,
            );
            return Ok(());
        }

        if message.mutability() == Mutability::Mutable && targets.len() > 1 {
            return Err(DeliveryError::MutableMessageMultipleSubscribers { mbox: self.id });
        }

        for sink in targets {
            sink.push_event(self.id, message.clone(), redirection_deep)?;
        }
        Ok(())
    }
}
