// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::hash::HashStorage;
use super::storage::{
    CreateOutcome, DropOutcome, SubscriptionError, SubscriptionKey, SubscriptionRecord,
    SubscriptionStorage,
};
use super::vector::VectorStorage;
use crate::agent::handler::EventHandler;
use crate::agent::state::State;
use crate::mbox::MboxRef;
use crate::message::MsgTypeId;
use crate::util::MboxId;

enum Inner {
    Small(VectorStorage),
    Large(HashStorage),
}

/// Storage for agents whose subscription count is unknown up front.
///
/// Starts as a vector; when the size crosses `threshold` the content
/// migrates into the hash representation, and migrates back once it
/// drops below half the threshold. Migration moves records with
/// `query_content`/`drop_content` and never touches the mboxes.
pub(crate) struct AdaptiveStorage {
    inner: Inner,
    threshold: usize,
}

impl AdaptiveStorage {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            inner: Inner::Small(VectorStorage::new(threshold.min(16))),
            threshold: threshold.max(2),
        }
    }

    fn migrate(from: &mut dyn SubscriptionStorage, to: &mut dyn SubscriptionStorage) {
        for record in from.query_content() {
            // Records are already registered on their mboxes; only the
            // index representation changes.
            let _ = to.create(&record.mbox, record.key, record.handler);
        }
        from.drop_content();
    }

    fn rebalance_after_growth(&mut self) {
        if let Inner::Small(small) = &mut self.inner {
            if small.len() > self.threshold {
                let mut large = HashStorage::new();
                Self::migrate(small, &mut large);
                self.inner = Inner::Large(large);
            }
        }
    }

    fn rebalance_after_shrink(&mut self) {
        if let Inner::Large(large) = &mut self.inner {
            if large.len() < self.threshold / 2 {
                let mut small = VectorStorage::new(self.threshold);
                Self::migrate(large, &mut small);
                self.inner = Inner::Small(small);
            }
        }
    }

    fn current(&self) -> &dyn SubscriptionStorage {
        match &self.inner {
            Inner::Small(s) => s,
            Inner::Large(l) => l,
        }
    }

    fn current_mut(&mut self) -> &mut dyn SubscriptionStorage {
        match &mut self.inner {
            Inner::Small(s) => s,
            Inner::Large(l) => l,
        }
    }
}

impl SubscriptionStorage for AdaptiveStorage {
    fn create(
        &mut self,
        mbox: &MboxRef,
        key: SubscriptionKey,
        handler: EventHandler,
    ) -> Result<CreateOutcome, SubscriptionError> {
        let outcome = self.current_mut().create(mbox, key, handler)?;
        self.rebalance_after_growth();
        Ok(outcome)
    }

    fn drop_subscription(
        &mut self,
        key: &SubscriptionKey,
    ) -> Result<DropOutcome, SubscriptionError> {
        let outcome = self.current_mut().drop_subscription(key)?;
        self.rebalance_after_shrink();
        Ok(outcome)
    }

    fn drop_all_for_mbox_type(&mut self, mbox_id: MboxId, msg_type: MsgTypeId) -> Option<MboxRef> {
        let mbox = self.current_mut().drop_all_for_mbox_type(mbox_id, msg_type);
        self.rebalance_after_shrink();
        mbox
    }

    fn find_exact(
        &self,
        mbox_id: MboxId,
        msg_type: MsgTypeId,
        state: State,
    ) -> Option<EventHandler> {
        self.current().find_exact(mbox_id, msg_type, state)
    }

    fn query_content(&self) -> Vec<SubscriptionRecord> {
        self.current().query_content()
    }

    fn drop_content(&mut self) {
        self.current_mut().drop_content();
    }

    fn len(&self) -> usize {
        self.current().len()
    }
}
