// Layer 1: Standard library imports
use std::collections::{BTreeSet, HashMap};
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

/// Two-structure storage for agents with hundreds of subscriptions:
/// a hash map gives O(1) `find_exact`, an ordered key set keeps
/// deterministic iteration for removal and snapshots.
#[derive(Default)]
pub(crate) struct HashStorage {
    by_key: HashMap<SubscriptionKey, (MboxRef, EventHandler)>,
    ordered: BTreeSet<SubscriptionKey>,
    pair_counts: HashMap<(MboxId, MsgTypeId), usize>,
}

impl HashStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionStorage for HashStorage {
    fn create(
        &mut self,
        mbox: &MboxRef,
        key: SubscriptionKey,
        handler: EventHandler,
    ) -> Result<CreateOutcome, SubscriptionError> {
        if self.by_key.contains_key(&key) {
            return Err(SubscriptionError::HandlerAlreadyRegistered { key });
        }
        self.by_key.insert(key, (Arc::clone(mbox), handler));
        self.ordered.insert(key);
        let count = self.pair_counts.entry(key.pair()).or_insert(0);
        *count += 1;
        Ok(CreateOutcome {
            first_for_mbox_type: *count == 1,
        })
    }

    fn drop_subscription(
        &mut self,
        key: &SubscriptionKey,
    ) -> Result<DropOutcome, SubscriptionError> {
        let (mbox, _) = self
            .by_key
            .remove(key)
            .ok_or(SubscriptionError::SubscriptionNotFound { key: *key })?;
        self.ordered.remove(key);
        let last = match self.pair_counts.get_mut(&key.pair()) {
            Some(count) => {
                *count -= 1;
                *count == 0
            }
            None => true,
        };
        if last {
            self.pair_counts.remove(&key.pair());
        }
        Ok(DropOutcome {
            mbox,
            last_for_mbox_type: last,
        })
    }

    fn drop_all_for_mbox_type(&mut self, mbox_id: MboxId, msg_type: MsgTypeId) -> Option<MboxRef> {
        let keys: Vec<SubscriptionKey> = self
            .ordered
            .iter()
            .filter(|k| k.pair() == (mbox_id, msg_type))
            .copied()
            .collect();
        let mut mbox = None;
        for key in keys {
            self.ordered.remove(&key);
            if let Some((m, _)) = self.by_key.remove(&key) {
                mbox.get_or_insert(m);
            }
        }
        self.pair_counts.remove(&(mbox_id, msg_type));
        mbox
    }

    fn find_exact(
        &self,
        mbox_id: MboxId,
        msg_type: MsgTypeId,
        state: State,
    ) -> Option<EventHandler> {
        self.by_key
            .get(&SubscriptionKey {
                mbox_id,
                msg_type,
                state,
            })
            .map(|(_, handler)| handler.clone())
    }

    fn query_content(&self) -> Vec<SubscriptionRecord> {
        self.ordered
            .iter()
            .filter_map(|key| {
                self.by_key.get(key).map(|(mbox, handler)| SubscriptionRecord {
                    mbox: Arc::clone(mbox),
                    key: *key,
                    handler: handler.clone(),
                })
            })
            .collect()
    }

    fn drop_content(&mut self) {
        self.by_key.clear();
        self.ordered.clear();
        self.pair_counts.clear();
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }
}
