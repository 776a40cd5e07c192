// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::storage::{
    CreateOutcome, DropOutcome, SubscriptionError, SubscriptionKey, SubscriptionRecord,
    SubscriptionStorage,
};
use crate::agent::handler::EventHandler;
use crate::agent::state::State;
use crate::mbox::MboxRef;
use crate::message::MsgTypeId;
use crate::util::MboxId;

/// Unsorted vector with linear search. The cheapest representation for
/// agents with a handful of subscriptions, which is the common case.
#[derive(Default)]
pub(crate) struct VectorStorage {
    records: Vec<SubscriptionRecord>,
}

impl VectorStorage {
    pub(crate) fn new(initial_capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(initial_capacity),
        }
    }

    fn count_pair(&self, mbox_id: MboxId, msg_type: MsgTypeId) -> usize {
        self.records
            .iter()
            .filter(|r| r.key.pair() == (mbox_id, msg_type))
            .count()
    }
}

impl SubscriptionStorage for VectorStorage {
    fn create(
        &mut self,
        mbox: &MboxRef,
        key: SubscriptionKey,
        handler: EventHandler,
    ) -> Result<CreateOutcome, SubscriptionError> {
        if self.records.iter().any(|r| r.key == key) {
            return Err(SubscriptionError::HandlerAlreadyRegistered { key });
        }
        let first = self.count_pair(key.mbox_id, key.msg_type) == 0;
        self.records.push(SubscriptionRecord {
            mbox: Arc::clone(mbox),
            key,
            handler,
        });
        Ok(CreateOutcome {
            first_for_mbox_type: first,
        })
    }

    fn drop_subscription(
        &mut self,
        key: &SubscriptionKey,
    ) -> Result<DropOutcome, SubscriptionError> {
        let pos = self
            .records
            .iter()
            .position(|r| r.key == *key)
            .ok_or(SubscriptionError::SubscriptionNotFound { key: *key })?;
        let removed = self.records.swap_remove(pos);
        Ok(DropOutcome {
            last_for_mbox_type: self.count_pair(key.mbox_id, key.msg_type) == 0,
            mbox: removed.mbox,
        })
    }

    fn drop_all_for_mbox_type(&mut self, mbox_id: MboxId, msg_type: MsgTypeId) -> Option<MboxRef> {
        let mut mbox = None;
        self.records.retain(|r| {
            if r.key.pair() == (mbox_id, msg_type) {
                mbox.get_or_insert_with(|| Arc::clone(&r.mbox));
                false
            } else {
                true
            }
        });
        mbox
    }

    fn find_exact(
        &self,
        mbox_id: MboxId,
        msg_type: MsgTypeId,
        state: State,
    ) -> Option<EventHandler> {
        self.records
            .iter()
            .find(|r| {
                r.key.mbox_id == mbox_id && r.key.msg_type == msg_type && r.key.state == state
            })
            .map(|r| r.handler.clone())
    }

    fn query_content(&self) -> Vec<SubscriptionRecord> {
        self.records
            .iter()
            .map(|r| SubscriptionRecord {
                mbox: Arc::clone(&r.mbox),
                key: r.key,
                handler: r.handler.clone(),
            })
            .collect()
    }

    fn drop_content(&mut self) {
        self.records.clear();
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
