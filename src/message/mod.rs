//! Message subsystem: payload handles, type tags, signals and envelopes.

pub mod envelope;
pub mod payload;
pub mod traits;

pub use envelope::{Envelope, EnvelopeInvoker};
pub use payload::MessageRef;
pub use traits::{Message, MsgTypeId, Mutability, Signal};
