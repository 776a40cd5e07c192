// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::traits::{DeliveryError, MessageSink, MessageSinkRef};
use crate::message::MessageRef;
use crate::util::{AgentId, MboxId};

/// Placeholder sink for subscriber slots that only carry a delivery
/// filter so far. It is never pushed to: slots with this sink stay
/// `subscribed == false` until the real subscription replaces them.
pub(crate) struct NullSink {
    id: AgentId,
}

impl NullSink {
    pub(crate) fn shared(id: AgentId) -> MessageSinkRef {
        Arc::new(Self { id })
    }
}

impl MessageSink for NullSink {
    fn sink_id(&self) -> AgentId {
        self.id
    }

    fn push_event(
        &self,
        _mbox_id: MboxId,
        _message: MessageRef,
        _redirection_deep: u32,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Test helper: a sink that counts accepted messages.
#[cfg(test)]
pub(crate) struct CountingSink {
    id: AgentId,
    count: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl CountingSink {
    pub(crate) fn shared(id: AgentId) -> Arc<Self> {
        Arc::new(Self {
            id,
            count: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    pub(crate) fn received(&self) -> usize {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl MessageSink for CountingSink {
    fn sink_id(&self) -> AgentId {
        self.id
    }

    fn push_event(
        &self,
        _mbox_id: MboxId,
        _message: MessageRef,
        _redirection_deep: u32,
    ) -> Result<(), DeliveryError> {
        self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
