// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::payload::MessageRef;

/// Message wrapper that intercepts delivery through access hooks.
///
/// An envelope travels through mboxes exactly like the message it
/// wraps: subscription matching, delivery filters and message limits
/// are all evaluated against the *inner* payload. The envelope gets
/// control at two well-defined points:
///
/// - [`handler_found_hook`](Envelope::handler_found_hook) fires once
///   per subscriber, immediately before the subscriber's handler would
///   run. The envelope decides whether to call
///   [`EnvelopeInvoker::invoke`] (the handler runs with the payload the
///   envelope supplies) or to stay silent (the handler is suppressed).
///   Revocation, expiration and instrumentation are built on this hook.
/// - [`transformation_hook`](Envelope::transformation_hook) fires when
///   the runtime needs the inner payload itself: delivery-filter
///   evaluation and the `limit_then_transform` overflow reaction.
///
/// Both hooks may be called from any thread that delivers or executes
/// demands, so implementations must be internally synchronized.
pub trait Envelope: Send + Sync + 'static {
    /// A subscriber is about to run its handler. Call
    /// `invoker.invoke(payload)` to let it, or return without calling
    /// to suppress this particular invocation.
    fn handler_found_hook(&self, invoker: &mut dyn EnvelopeInvoker);

    /// The runtime needs the payload for inspection or transformation.
    /// Call `invoker.invoke(payload)` to reveal it, or return without
    /// calling to report that the payload is no longer available.
    fn transformation_hook(&self, invoker: &mut dyn EnvelopeInvoker);
}

/// Callback handed to an [`Envelope`] hook.
pub trait EnvelopeInvoker {
    /// Deliver the inner payload to the waiting party.
    fn invoke(&mut self, message: &MessageRef);
}

/// Adapter turning a closure into an [`EnvelopeInvoker`].
pub(crate) struct FnInvoker<'a> {
    f: &'a mut dyn FnMut(&MessageRef),
}

impl<'a> FnInvoker<'a> {
    pub(crate) fn new(f: &'a mut dyn FnMut(&MessageRef)) -> Self {
        Self { f }
    }
}

impl EnvelopeInvoker for FnInvoker<'_> {
    fn invoke(&mut self, message: &MessageRef) {
        (self.f)(message)
    }
}

/// Ask an envelope to reveal its payload via the transformation hook.
/// Returns `None` when the envelope declines (revoked, expired).
pub(crate) fn extract_for_transformation(envelope: &Arc<dyn Envelope>) -> Option<MessageRef> {
    let mut captured = None;
    let mut grab = |m: &MessageRef| captured = Some(m.clone());
    envelope.transformation_hook(&mut FnInvoker::new(&mut grab));
    captured
}
