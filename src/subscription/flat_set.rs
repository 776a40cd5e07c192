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

/// Sorted vector with binary search: compact like the plain vector but
/// with ordered access, for small subscription sets that are probed
/// often.
#[derive(Default)]
pub(crate) struct FlatSetStorage {
    records: Vec<SubscriptionRecord>,
}

impl FlatSetStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &SubscriptionKey) -> Result<usize, usize> {
        self.records.binary_search_by(|r| r.key.cmp(key))
    }

    /// Half-open index range of all records with the given pair. Relies
    /// on the key ordering being `(mbox_id, msg_type, state)`.
    fn pair_range(&self, mbox_id: MboxId, msg_type: MsgTypeId) -> (usize, usize) {
        let start = self
            .records
            .partition_point(|r| r.key.pair() < (mbox_id, msg_type));
        let end = self
            .records
            .partition_point(|r| r.key.pair() <= (mbox_id, msg_type));
        (start, end)
    }
}

impl SubscriptionStorage for FlatSetStorage {
    fn create(
        &mut self,
        mbox: &MboxRef,
        key: SubscriptionKey,
        handler: EventHandler,
    ) -> Result<CreateOutcome, SubscriptionError> {
        match self.position(&key) {
            Ok(_) => Err(SubscriptionError::HandlerAlreadyRegistered { key }),
            Err(insert_at) => {
                let (start, end) = self.pair_range(key.mbox_id, key.msg_type);
                let first = start == end;
                self.records.insert(
                    insert_at,
                    SubscriptionRecord {
                        mbox: Arc::clone(mbox),
                        key,
                        handler,
                    },
                );
                Ok(CreateOutcome {
                    first_for_mbox_type: first,
                })
            }
        }
    }

    fn drop_subscription(
        &mut self,
        key: &SubscriptionKey,
    ) -> Result<DropOutcome, SubscriptionError> {
        let pos = self
            .position(key)
            .map_err(|_| SubscriptionError::SubscriptionNotFound { key: *key })?;
        let removed = self.records.remove(pos);
        let (start, end) = self.pair_range(key.mbox_id, key.msg_type);
        Ok(DropOutcome {
            mbox: removed.mbox,
            last_for_mbox_type: start == end,
        })
    }

    fn drop_all_for_mbox_type(&mut self, mbox_id: MboxId, msg_type: MsgTypeId) -> Option<MboxRef> {
        let (start, end) = self.pair_range(mbox_id, msg_type);
        if start == end {
            return None;
        }
        let mbox = Arc::clone(&self.records[start].mbox);
        self.records.drain(start..end);
        Some(mbox)
    }

    fn find_exact(
        &self,
        mbox_id: MboxId,
        msg_type: MsgTypeId,
        state: State,
    ) -> Option<EventHandler> {
        self.position(&SubscriptionKey {
            mbox_id,
            msg_type,
            state,
        })
        .ok()
        .map(|pos| self.records[pos].handler.clone())
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
