// Layer 1: Standard library imports
use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use super::envelope::{extract_for_transformation, Envelope};
use super::traits::{Message, MsgTypeId, Mutability, Signal};

/// Storage behind a [`MessageRef`].
#[derive(Clone)]
pub(crate) enum Payload {
    /// A signal: no payload, only the type tag travels.
    Signal,
    /// A classical immutable message, shared between subscribers.
    Instance(Arc<dyn Any + Send + Sync>),
    /// A mutable message: `Arc<Mutex<M>>` behind the erasure. The
    /// single-subscriber rule is enforced at delivery time; the lock is
    /// the mechanical gate to `&mut M`.
    Mutable(Arc<dyn Any + Send + Sync>),
    /// An envelope wrapping a nested payload.
    Envelope(Arc<dyn Envelope>),
}

/// Cheap-to-clone handle to one message in flight.
///
/// A `MessageRef` bundles the runtime type tag with the reference-counted
/// payload. Cloning only bumps the refcount; the payload lives as long
/// as any delivery reference holds it.
///
/// # Example
/// ```rust
/// use agentry::message::MessageRef;
///
/// #[derive(Debug)]
/// struct Ping {
///     seq: u32,
/// }
///
/// let msg = MessageRef::message(Ping { seq: 1 });
/// assert_eq!(msg.downcast_ref::<Ping>().map(|p| p.seq), Some(1));
/// ```
#[derive(Clone)]
pub struct MessageRef {
    tag: MsgTypeId,
    payload: Payload,
}

impl MessageRef {
    /// Wrap an immutable message.
    pub fn message<M: Message>(message: M) -> Self {
        Self {
            tag: MsgTypeId::immutable::<M>(),
            payload: Payload::Instance(Arc::new(message)),
        }
    }

    /// Wrap a mutable message. Delivery will be rejected unless at most
    /// one subscriber accepts it.
    pub fn mutable_message<M: Message>(message: M) -> Self {
        Self {
            tag: MsgTypeId::mutable::<M>(),
            payload: Payload::Mutable(Arc::new(Mutex::new(message))),
        }
    }

    /// Make a signal reference. Only the type tag is delivered.
    pub fn signal<S: Signal>() -> Self {
        Self {
            tag: MsgTypeId::immutable::<S>(),
            payload: Payload::Signal,
        }
    }

    /// Wrap an envelope around a payload of type `inner_tag`.
    ///
    /// The tag must be the tag of the message the envelope reveals from
    /// its hooks; subscription matching happens on it, the envelope
    /// itself stays transparent.
    pub fn enveloped<E: Envelope>(inner_tag: MsgTypeId, envelope: E) -> Self {
        Self {
            tag: inner_tag,
            payload: Payload::Envelope(Arc::new(envelope)),
        }
    }

    /// The runtime type tag this reference is matched on.
    pub fn type_tag(&self) -> MsgTypeId {
        self.tag
    }

    /// Shorthand for `type_tag().mutability()`.
    pub fn mutability(&self) -> Mutability {
        self.tag.mutability()
    }

    /// Is this a payload-less signal?
    pub fn is_signal(&self) -> bool {
        matches!(self.payload, Payload::Signal)
    }

    /// Is this an envelope-wrapped payload?
    pub fn is_envelope(&self) -> bool {
        matches!(self.payload, Payload::Envelope(_))
    }

    /// Borrow the payload as `&M`. Returns `None` for signals, mutable
    /// payloads, envelopes and type mismatches.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        match &self.payload {
            Payload::Instance(any) => (**any).downcast_ref::<M>(),
            _ => None,
        }
    }

    /// Run `f` with exclusive access to a mutable payload of type `M`.
    /// Returns `None` if the payload is not a mutable `M`.
    pub fn with_mutable<M: Message, R>(&self, f: impl FnOnce(&mut M) -> R) -> Option<R> {
        match &self.payload {
            Payload::Mutable(any) => {
                let cell = (**any).downcast_ref::<Mutex<M>>()?;
                Some(f(&mut cell.lock()))
            }
            _ => None,
        }
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Resolve the reference to the payload delivery filters and limit
    /// transformations should look at. Envelopes are unwrapped (nested
    /// envelopes recursively); a declined extraction yields `None`.
    pub(crate) fn for_inspection(&self) -> Option<MessageRef> {
        match &self.payload {
            Payload::Envelope(envelope) => {
                extract_for_transformation(envelope).and_then(|inner| inner.for_inspection())
            }
            _ => Some(self.clone()),
        }
    }
}

impl Debug for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.payload {
            Payload::Signal => "signal",
            Payload::Instance(_) => "message",
            Payload::Mutable(_) => "mutable",
            Payload::Envelope(_) => "envelope",
        };
        write!(f, "MessageRef({kind}, {:?})", self.tag)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::envelope::EnvelopeInvoker;
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Sample {
        value: u32,
    }

    struct Tick;
    impl Signal for Tick {}

    #[test]
    fn test_immutable_roundtrip() {
        let msg = MessageRef::message(Sample { value: 7 });

        assert_eq!(msg.mutability(), Mutability::Immutable);
        assert_eq!(msg.downcast_ref::<Sample>().unwrap().value, 7);
        assert!(msg.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn test_clone_shares_payload() {
        let a = MessageRef::message(Sample { value: 1 });
        let b = a.clone();

        assert_eq!(a.type_tag(), b.type_tag());
        assert_eq!(b.downcast_ref::<Sample>().unwrap().value, 1);
    }

    #[test]
    fn test_mutable_access() {
        let msg = MessageRef::mutable_message(Sample { value: 1 });

        assert_eq!(msg.mutability(), Mutability::Mutable);
        assert!(msg.downcast_ref::<Sample>().is_none());

        let seen = msg.with_mutable::<Sample, _>(|s| {
            s.value += 1;
            s.value
        });
        assert_eq!(seen, Some(2));

        let again = msg.with_mutable::<Sample, _>(|s| s.value);
        assert_eq!(again, Some(2));
    }

    #[test]
    fn test_signal_has_no_payload() {
        let msg = MessageRef::signal::<Tick>();

        assert!(msg.is_signal());
        assert_eq!(msg.type_tag(), MsgTypeId::immutable::<Tick>());
        assert!(msg.downcast_ref::<Tick>().is_none());
    }

    struct Transparent {
        inner: MessageRef,
    }

    impl Envelope for Transparent {
        fn handler_found_hook(&self, invoker: &mut dyn EnvelopeInvoker) {
            invoker.invoke(&self.inner);
        }

        fn transformation_hook(&self, invoker: &mut dyn EnvelopeInvoker) {
            invoker.invoke(&self.inner);
        }
    }

    struct Revoked;

    impl Envelope for Revoked {
        fn handler_found_hook(&self, _invoker: &mut dyn EnvelopeInvoker) {}
        fn transformation_hook(&self, _invoker: &mut dyn EnvelopeInvoker) {}
    }

    #[test]
    fn test_envelope_is_transparent_for_matching() {
        let inner = MessageRef::message(Sample { value: 3 });
        let wrapped = MessageRef::enveloped(inner.type_tag(), Transparent { inner });

        assert!(wrapped.is_envelope());
        assert_eq!(wrapped.type_tag(), MsgTypeId::immutable::<Sample>());
    }

    #[test]
    fn test_envelope_inspection_unwraps() {
        let inner = MessageRef::message(Sample { value: 3 });
        let wrapped = MessageRef::enveloped(inner.type_tag(), Transparent { inner });

        let revealed = wrapped.for_inspection().unwrap();
        assert_eq!(revealed.downcast_ref::<Sample>().unwrap().value, 3);
    }

    #[test]
    fn test_nested_envelope_inspection() {
        let inner = MessageRef::message(Sample { value: 9 });
        let tag = inner.type_tag();
        let once = MessageRef::enveloped(tag, Transparent { inner });
        let twice = MessageRef::enveloped(tag, Transparent { inner: once });

        let revealed = twice.for_inspection().unwrap();
        assert_eq!(revealed.downcast_ref::<Sample>().unwrap().value, 9);
    }

    #[test]
    fn test_revoked_envelope_yields_nothing() {
        let tag = MsgTypeId::immutable::<Sample>();
        let wrapped = MessageRef::enveloped(tag, Revoked);

        assert!(wrapped.for_inspection().is_none());
    }
}
