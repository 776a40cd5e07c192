//! Mbox subsystem: MPMC and MPSC message boxes, the named registry,
//! delivery filters and the send helpers.

pub(crate) mod direct;
pub(crate) mod local;
pub mod named;
pub(crate) mod null_sink;
pub mod send;
pub mod traits;

pub use named::MboxNamespace;
pub use send::{resend, send, send_enveloped, send_mutable, send_signal};
pub use traits::{
    AbstractMbox, DeliveryError, DeliveryFilterFn, MboxError, MboxRef, MboxType, MessageSink,
    MessageSinkRef, DEFAULT_REDIRECTION_DEPTH,
};
