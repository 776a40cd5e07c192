// Layer 1: Standard library imports
use std::any::{Any, TypeId};
use std::fmt::{self, Debug};

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
// (none)

/// Marker trait for message payloads.
///
/// Any `Send + Sync + 'static` type can travel through an mbox, so the
/// trait is blanket-implemented. It exists to make message bounds read
/// as intent (`M: Message`) and to leave room for future requirements
/// without touching every signature.
///
/// # Example
/// ```rust
/// use agentry::message::Message;
///
/// #[derive(Debug)]
/// struct AddUser {
///     name: String,
/// }
///
/// fn assert_message<M: Message>() {}
/// assert_message::<AddUser>();
/// ```
pub trait Message: Any + Send + Sync + 'static {}

impl<T: Any + Send + Sync + 'static> Message for T {}

/// Marker trait for signals.
///
/// A signal is a message type that carries no payload; only its type
/// identity is delivered. Implement it for empty structs used as pure
/// notifications.
///
/// # Example
/// ```rust
/// use agentry::message::Signal;
///
/// struct Shutdown;
/// impl Signal for Shutdown {}
/// ```
pub trait Signal: Message {}

/// Mutability of a message payload.
///
/// A mutable message must reach at most one subscriber; the runtime
/// rejects a delivery that would fan it out. Mutability takes part in
/// the subscription type tag, so subscribing to the mutable form of `T`
/// is distinct from subscribing to the immutable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mutability {
    /// Shared, read-only payload; any number of subscribers.
    Immutable,
    /// Exclusive payload; at most one subscriber per delivery.
    Mutable,
}

/// Runtime type tag of a message: the payload's `TypeId` plus its
/// mutability. This pair is the key subscriptions and deliveries are
/// matched on.
///
/// # Example
/// ```rust
/// use agentry::message::MsgTypeId;
///
/// struct Ping;
/// assert_ne!(MsgTypeId::immutable::<Ping>(), MsgTypeId::mutable::<Ping>());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsgTypeId {
    type_id: TypeId,
    mutability: Mutability,
}

impl MsgTypeId {
    /// Tag for the immutable form of `M`.
    pub fn immutable<M: Message>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            mutability: Mutability::Immutable,
        }
    }

    /// Tag for the mutable form of `M`.
    pub fn mutable<M: Message>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            mutability: Mutability::Mutable,
        }
    }

    /// Mutability component of the tag.
    pub fn mutability(&self) -> Mutability {
        self.mutability
    }

    /// The payload `TypeId` component of the tag.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl Debug for MsgTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.type_id, self.mutability)
    }
}
