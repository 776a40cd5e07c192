// Layer 1: Standard library imports
use std::sync::{Arc, Weak};

// Layer 2: Third-party crate imports
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

// Layer 3: Internal module imports
use super::traits::{
    AbstractMbox, DeliveryError, DeliveryFilterFn, MboxError, MboxType, MessageSinkRef,
};
use crate::message::{MessageRef, MsgTypeId};
use crate::util::{AgentId, MboxId};

/// Key of the named-mbox registry: `(namespace, name)`.
///
/// The plain `create_named_mbox(name)` API uses the empty namespace;
/// `introduce_named_mbox` lets layers keep their names apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MboxNamespace {
    namespace: String,
    name: String,
}

impl MboxNamespace {
    /// Name in the default (empty) namespace.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Name in an explicit namespace.
    pub fn scoped(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The namespace part (empty string for plain names).
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The name part.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A named wrapper around an underlying mbox.
///
/// The registry holds only a `Weak` to this wrapper. Dropping the last
/// external `Arc` therefore runs `Drop`, which removes the registry
/// entry: that is exactly the external-reference-counting lifetime the
/// named registry promises.
pub(crate) struct NamedMbox {
    key: MboxNamespace,
    inner: MboxRefInner,
    registry: Weak<NamedMboxRegistry>,
}

type MboxRefInner = Arc<dyn AbstractMbox>;

impl AbstractMbox for NamedMbox {
    fn id(&self) -> MboxId {
        self.inner.id()
    }

    fn mbox_type(&self) -> MboxType {
        self.inner.mbox_type()
    }

    fn name(&self) -> String {
        if self.key.namespace.is_empty() {
            format!("<mbox:name={}:id={}>", self.key.name, self.inner.id().raw())
        } else {
            format!(
                "<mbox:name={}::{}:id={}>",
                self.key.namespace,
                self.key.name,
                self.inner.id().raw()
            )
        }
    }

    fn subscribe_event_handler(
        &self,
        msg_type: MsgTypeId,
        sink: MessageSinkRef,
    ) -> Result<(), MboxError> {
        self.inner.subscribe_event_handler(msg_type, sink)
    }

    fn unsubscribe_event_handler(&self, msg_type: MsgTypeId, sink_id: AgentId) {
        self.inner.unsubscribe_event_handler(msg_type, sink_id)
    }

    fn set_delivery_filter(
        &self,
        msg_type: MsgTypeId,
        sink_id: AgentId,
        filter: DeliveryFilterFn,
    ) -> Result<(), MboxError> {
        self.inner.set_delivery_filter(msg_type, sink_id, filter)
    }

    fn drop_delivery_filter(&self, msg_type: MsgTypeId, sink_id: AgentId) {
        self.inner.drop_delivery_filter(msg_type, sink_id)
    }

    fn deliver(&self, message: MessageRef, redirection_deep: u32) -> Result<(), DeliveryError> {
        self.inner.deliver(message, redirection_deep)
    }
}

impl Drop for NamedMbox {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            // Keep the entry if another thread re-created the name
            // between our refcount hitting zero and this drop.
            registry
                .entries
                .remove_if(&self.key, |_, weak| weak.strong_count() == 0);
        }
    }
}

/// Process-wide registry of named mboxes.
///
/// Looking a name up returns the existing mbox when present, otherwise
/// constructs a fresh one via the supplied factory. The entry lives
/// while at least one external reference is alive.
#[derive(Default)]
pub(crate) struct NamedMboxRegistry {
    entries: DashMap<MboxNamespace, Weak<NamedMbox>>,
}

impl NamedMboxRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of currently registered names.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn lookup_or_create(
        self: &Arc<Self>,
        key: MboxNamespace,
        factory: impl FnOnce() -> MboxRefInner,
    ) -> MboxRefInner {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Some(existing) = occupied.get().upgrade() {
                    existing
                } else {
                    let fresh = Arc::new(NamedMbox {
                        key,
                        inner: factory(),
                        registry: Arc::downgrade(self),
                    });
                    occupied.insert(Arc::downgrade(&fresh));
                    fresh
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = Arc::new(NamedMbox {
                    key,
                    inner: factory(),
                    registry: Arc::downgrade(self),
                });
                vacant.insert(Arc::downgrade(&fresh));
                fresh
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mbox::local::LocalMbox;
    use crate::msg_tracing::TraceSink;

    fn local(id: u64) -> MboxRefInner {
        Arc::new(LocalMbox::new(MboxId::from_raw(id), TraceSink::default()))
    }

    #[test]
    fn test_same_name_returns_same_mbox() {
        let registry = NamedMboxRegistry::new();

        let a = registry.lookup_or_create(MboxNamespace::plain("alpha"), || local(1));
        let b = registry.lookup_or_create(MboxNamespace::plain("alpha"), || local(2));

        assert_eq!(a.id(), b.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_different_namespaces_are_distinct() {
        let registry = NamedMboxRegistry::new();

        let a = registry.lookup_or_create(MboxNamespace::scoped("ns1", "x"), || local(1));
        let b = registry.lookup_or_create(MboxNamespace::scoped("ns2", "x"), || local(2));

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_entry_survives_partial_release() {
        let registry = NamedMboxRegistry::new();

        let a = registry.lookup_or_create(MboxNamespace::plain("alpha"), || local(1));
        let b = registry.lookup_or_create(MboxNamespace::plain("alpha"), || local(2));

        drop(a);
        assert_eq!(registry.len(), 1);

        let c = registry.lookup_or_create(MboxNamespace::plain("alpha"), || local(3));
        assert_eq!(b.id(), c.id());
    }

    #[test]
    fn test_entry_removed_after_last_release() {
        let registry = NamedMboxRegistry::new();

        let a = registry.lookup_or_create(MboxNamespace::plain("alpha"), || local(1));
        let first_id = a.id();
        drop(a);
        assert_eq!(registry.len(), 0);

        let b = registry.lookup_or_create(MboxNamespace::plain("alpha"), || local(9));
        assert_ne!(b.id(), first_id);
    }

    #[test]
    fn test_named_mbox_name_mentions_the_name() {
        let registry = NamedMboxRegistry::new();
        let a = registry.lookup_or_create(MboxNamespace::plain("alpha"), || local(1));
        assert!(a.name().contains("alpha"));

        let scoped = registry.lookup_or_create(MboxNamespace::scoped("ns", "x"), || local(2));
        assert!(scoped.name().contains("ns::x"));
    }
}
