// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::traits::{AbstractMbox, DeliveryError, MboxRef, DEFAULT_REDIRECTION_DEPTH};
use crate::message::{Envelope, Message, MessageRef, MsgTypeId, Signal};

/// Send an immutable message to an mbox.
///
/// # Example
/// ```rust,ignore
/// agentry::send(&target, PriceChanged { value: 42 })?;
/// ```
pub fn send<M: Message>(to: &MboxRef, message: M) -> Result<(), DeliveryError> {
    to.deliver(MessageRef::message(message), DEFAULT_REDIRECTION_DEPTH)
}

/// Send a mutable message. Fails with
/// [`DeliveryError::MutableMessageMultipleSubscribers`] if more than one
/// subscriber would accept it.
pub fn send_mutable<M: Message>(to: &MboxRef, message: M) -> Result<(), DeliveryError> {
    to.deliver(
        MessageRef::mutable_message(message),
        DEFAULT_REDIRECTION_DEPTH,
    )
}

/// Send a payload-less signal.
pub fn send_signal<S: Signal>(to: &MboxRef) -> Result<(), DeliveryError> {
    to.deliver(MessageRef::signal::<S>(), DEFAULT_REDIRECTION_DEPTH)
}

/// Send an envelope wrapping a payload of type `inner_tag`.
pub fn send_enveloped<E: Envelope>(
    to: &MboxRef,
    inner_tag: MsgTypeId,
    envelope: E,
) -> Result<(), DeliveryError> {
    to.deliver(
        MessageRef::enveloped(inner_tag, envelope),
        DEFAULT_REDIRECTION_DEPTH,
    )
}

/// Forward an already-materialized message reference.
///
/// `redirection_deep` is the remaining budget of the logical message;
/// handlers that store and re-send messages pass a decremented value to
/// keep forwarding bounded.
pub fn resend(
    to: &MboxRef,
    message: MessageRef,
    redirection_deep: u32,
) -> Result<(), DeliveryError> {
    if redirection_deep == 0 {
        return Err(DeliveryError::RedirectionTooDeep { mbox: to.id() });
    }
    to.deliver(message, redirection_deep - 1)
}
