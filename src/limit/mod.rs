//! Per-agent, per-message-type overload control.
//!
//! An agent declares, before registration, how many messages of a type
//! may sit in its event queue and what happens to the excess. The
//! limits are enforced on the sender's thread inside delivery: the
//! counter is raised before the demand is enqueued and released when
//! the demand leaves the queue, so the count can never exceed the
//! declared threshold.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
use crate::mbox::{AbstractMbox, DeliveryError, MboxRef};
use crate::message::{Message, MessageRef, MsgTypeId};
use crate::msg_tracing::{TraceAction, TraceSink};
use crate::util::MboxId;

/// Factory producing the redirection target of `limit_then_redirect`.
pub type RedirectTargetFn = Arc<dyn Fn() -> MboxRef + Send + Sync>;

/// Transformation of `limit_then_transform`: receives the overflowing
/// payload, produces a replacement addressed wherever it decides.
/// Returning `None` drops the message (used when an envelope declines
/// to reveal its payload).
pub type TransformFn = Arc<dyn Fn(&MessageRef) -> Option<TransformedMessage> + Send + Sync>;

/// Result of a `limit_then_transform` reaction.
pub struct TransformedMessage {
    /// Where the replacement goes.
    pub mbox: MboxRef,
    /// The replacement message.
    pub message: MessageRef,
}

impl TransformedMessage {
    /// Replacement carrying an immutable message.
    pub fn new<M: Message>(mbox: MboxRef, message: M) -> Self {
        Self {
            mbox,
            message: MessageRef::message(message),
        }
    }
}

/// What to do with a message over the limit.
#[derive(Clone)]
pub(crate) enum OverflowReaction {
    /// Silently discard the message.
    Drop,
    /// Terminate the process after logging. Reserved for messages whose
    /// loss would break application invariants.
    Abort,
    /// Re-send the message to another mbox.
    RedirectTo(RedirectTargetFn),
    /// Replace the message with a new one.
    TransformTo(TransformFn),
}

/// Declarative set of per-type limits, built before the agent is
/// registered.
///
/// # Example
/// ```rust,ignore
/// let limits = MessageLimits::new()
///     .limit_then_drop::<StatusPing>(1)
///     .limit_then_redirect::<Job>(100, move || overflow_mbox.clone());
/// ```
#[derive(Default)]
pub struct MessageLimits {
    exact: Vec<(MsgTypeId, usize, OverflowReaction)>,
    any_other: Option<(usize, OverflowReaction)>,
}

impl MessageLimits {
    /// Empty set: no limits at all.
    pub fn new() -> Self {
        Self::default()
    }

    fn push<M: Message>(mut self, limit: usize, reaction: OverflowReaction) -> Self {
        self.exact
            .push((MsgTypeId::immutable::<M>(), limit, reaction));
        self
    }

    /// Over `limit` messages of type `M`: discard the excess.
    pub fn limit_then_drop<M: Message>(self, limit: usize) -> Self {
        self.push::<M>(limit, OverflowReaction::Drop)
    }

    /// Over `limit` messages of type `M`: log and terminate the process.
    pub fn limit_then_abort<M: Message>(self, limit: usize) -> Self {
        self.push::<M>(limit, OverflowReaction::Abort)
    }

    /// Over `limit` messages of type `M`: re-send to the mbox produced
    /// by `target`.
    pub fn limit_then_redirect<M: Message>(
        self,
        limit: usize,
        target: impl Fn() -> MboxRef + Send + Sync + 'static,
    ) -> Self {
        self.push::<M>(limit, OverflowReaction::RedirectTo(Arc::new(target)))
    }

    /// Over `limit` messages of type `M`: replace the message with
    /// whatever `transform` produces.
    pub fn limit_then_transform<M: Message>(
        self,
        limit: usize,
        transform: impl Fn(&M) -> TransformedMessage + Send + Sync + 'static,
    ) -> Self {
        let wrapped: TransformFn = Arc::new(move |payload: &MessageRef| {
            payload.downcast_ref::<M>().map(&transform)
        });
        self.push::<M>(limit, OverflowReaction::TransformTo(wrapped))
    }

    /// Wildcard for all types without an explicit entry: discard.
    pub fn any_unspecified_then_drop(mut self, limit: usize) -> Self {
        self.any_other = Some((limit, OverflowReaction::Drop));
        self
    }

    /// Wildcard for all types without an explicit entry: abort.
    pub fn any_unspecified_then_abort(mut self, limit: usize) -> Self {
        self.any_other = Some((limit, OverflowReaction::Abort));
        self
    }

    /// Wildcard for all types without an explicit entry: redirect.
    pub fn any_unspecified_then_redirect(
        mut self,
        limit: usize,
        target: impl Fn() -> MboxRef + Send + Sync + 'static,
    ) -> Self {
        self.any_other = Some((limit, OverflowReaction::RedirectTo(Arc::new(target))));
        self
    }

    /// Wildcard for all types without an explicit entry: transform.
    /// The transformation works on the raw payload reference since the
    /// concrete type is not known up front; returning `None` drops the
    /// message.
    pub fn any_unspecified_then_transform(
        mut self,
        limit: usize,
        transform: impl Fn(&MessageRef) -> Option<TransformedMessage> + Send + Sync + 'static,
    ) -> Self {
        self.any_other = Some((limit, OverflowReaction::TransformTo(Arc::new(transform))));
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.any_other.is_none()
    }
}

/// One live counter: `(agent, msg_type) -> (count, limit, reaction)`.
pub(crate) struct LimitControlBlock {
    limit: usize,
    count: AtomicUsize,
    reaction: OverflowReaction,
}

impl LimitControlBlock {
    fn new(limit: usize, reaction: OverflowReaction) -> Self {
        Self {
            limit,
            count: AtomicUsize::new(0),
            reaction,
        }
    }

    /// Raise the counter unless it is at the limit. The CAS loop keeps
    /// the `count <= limit` invariant under concurrent senders.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current >= self.limit {
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(seen) => current = seen,
            }
        }
    }

    pub(crate) fn release(&self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Run the configured reaction for a message that did not fit.
    pub(crate) fn on_overflow(
        &self,
        mbox_id: MboxId,
        message: &MessageRef,
        redirection_deep: u32,
        tracer: &TraceSink,
    ) -> Result<(), DeliveryError> {
        let msg_type = message.type_tag();
        match &self.reaction {
            OverflowReaction::Drop => {
                tracer.emit(
                    mbox_id,
                    || format!("<mbox:id={}>", mbox_id.raw()),
                    msg_type,
                    None,
                    TraceAction::OverlimitDrop,
                );
                Ok(())
            }
            OverflowReaction::Abort => {
                tracing::error!(
                    mbox = %mbox_id,
                    msg_type = ?msg_type,
                    limit = self.limit,
                    "message limit overflow with abort reaction"
                );
                std::process::abort();
            }
            OverflowReaction::RedirectTo(target) => {
                if redirection_deep == 0 {
                    return Err(DeliveryError::RedirectionTooDeep { mbox: mbox_id });
                }
                tracer.emit(
                    mbox_id,
                    || format!("<mbox:id={}>", mbox_id.raw()),
                    msg_type,
                    None,
                    TraceAction::OverlimitRedirect,
                );
                target().deliver(message.clone(), redirection_deep - 1)
            }
            OverflowReaction::TransformTo(transform) => {
                if redirection_deep == 0 {
                    return Err(DeliveryError::RedirectionTooDeep { mbox: mbox_id });
                }
                let payload = match message.for_inspection() {
                    Some(payload) => payload,
                    // The envelope declined to reveal its payload.
                    None => return Ok(()),
                };
                match transform(&payload) {
                    Some(transformed) => {
                        tracer.emit(
                            mbox_id,
                            || format!("<mbox:id={}>", mbox_id.raw()),
                            msg_type,
                            None,
                            TraceAction::OverlimitTransform,
                        );
                        transformed
                            .mbox
                            .deliver(transformed.message, redirection_deep - 1)
                    }
                    None => Ok(()),
                }
            }
        }
    }
}

/// Immutable runtime view of an agent's limits, shared by every mbox
/// that delivers to the agent.
pub(crate) struct LimitSet {
    exact: HashMap<MsgTypeId, Arc<LimitControlBlock>>,
    wildcard: Option<(usize, OverflowReaction)>,
    // Wildcard counters are per message type and materialize on first use.
    dynamic: DashMap<MsgTypeId, Arc<LimitControlBlock>>,
}

impl LimitSet {
    pub(crate) fn build(limits: MessageLimits) -> Option<Self> {
        if limits.is_empty() {
            return None;
        }
        let exact = limits
            .exact
            .into_iter()
            .map(|(tag, limit, reaction)| (tag, Arc::new(LimitControlBlock::new(limit, reaction))))
            .collect();
        Some(Self {
            exact,
            wildcard: limits.any_other,
            dynamic: DashMap::new(),
        })
    }

    pub(crate) fn block_for(&self, msg_type: MsgTypeId) -> Option<Arc<LimitControlBlock>> {
        if let Some(block) = self.exact.get(&msg_type) {
            return Some(Arc::clone(block));
        }
        let (limit, reaction) = self.wildcard.as_ref()?;
        let block = self
            .dynamic
            .entry(msg_type)
            .or_insert_with(|| Arc::new(LimitControlBlock::new(*limit, reaction.clone())));
        Some(Arc::clone(block.value()))
    }
}

/// Holds an acquired slot of a control block; releasing happens exactly
/// once, whenever the guard is dropped (after the handler ran, or when
/// an undelivered demand is discarded at shutdown).
#[derive(Default)]
pub(crate) struct LimitGuard(Option<Arc<LimitControlBlock>>);

impl LimitGuard {
    pub(crate) fn none() -> Self {
        Self(None)
    }

    pub(crate) fn acquired(block: Arc<LimitControlBlock>) -> Self {
        Self(Some(block))
    }
}

impl Drop for LimitGuard {
    fn drop(&mut self) {
        if let Some(block) = self.0.take() {
            block.release();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Job;

    #[derive(Debug)]
    struct Other;

    #[test]
    fn test_try_acquire_respects_limit() {
        let block = LimitControlBlock::new(2, OverflowReaction::Drop);

        assert!(block.try_acquire());
        assert!(block.try_acquire());
        assert!(!block.try_acquire());
        assert_eq!(block.count(), 2);
    }

    #[test]
    fn test_release_frees_a_slot() {
        let block = LimitControlBlock::new(1, OverflowReaction::Drop);

        assert!(block.try_acquire());
        assert!(!block.try_acquire());
        block.release();
        assert!(block.try_acquire());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let block = Arc::new(LimitControlBlock::new(1, OverflowReaction::Drop));

        assert!(block.try_acquire());
        let guard = LimitGuard::acquired(Arc::clone(&block));
        assert_eq!(block.count(), 1);
        drop(guard);
        assert_eq!(block.count(), 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let block = Arc::new(LimitControlBlock::new(50, OverflowReaction::Drop));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let b = Arc::clone(&block);
            handles.push(std::thread::spawn(move || {
                let mut acquired = 0usize;
                for _ in 0..100 {
                    if b.try_acquire() {
                        acquired += 1;
                    }
                    assert!(b.count() <= 50);
                }
                acquired
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50);
        assert_eq!(block.count(), 50);
    }

    #[test]
    fn test_limit_set_exact_and_wildcard() {
        let limits = MessageLimits::new()
            .limit_then_drop::<Job>(3)
            .any_unspecified_then_drop(1);
        let set = LimitSet::build(limits).unwrap();

        let job = set.block_for(MsgTypeId::immutable::<Job>()).unwrap();
        assert!(job.try_acquire());
        assert!(job.try_acquire());
        assert!(job.try_acquire());
        assert!(!job.try_acquire());

        let other = set.block_for(MsgTypeId::immutable::<Other>()).unwrap();
        assert!(other.try_acquire());
        assert!(!other.try_acquire());

        // The wildcard block is stable per type.
        let other_again = set.block_for(MsgTypeId::immutable::<Other>()).unwrap();
        assert!(!other_again.try_acquire());
    }

    #[test]
    fn test_no_limits_builds_nothing() {
        assert!(LimitSet::build(MessageLimits::new()).is_none());
    }

    #[test]
    fn test_wildcard_transform_reaction() {
        use crate::mbox::null_sink::CountingSink;
        use crate::mbox::traits::MessageSinkRef;
        use crate::mbox::local::LocalMbox;
        use crate::msg_tracing::TraceSink;
        use crate::util::AgentId;

        #[derive(Debug)]
        struct Summary;

        let target: MboxRef = Arc::new(LocalMbox::new(MboxId::from_raw(7), TraceSink::default()));
        let sink = CountingSink::shared(AgentId::from_raw(1));
        let as_sink: MessageSinkRef = Arc::clone(&sink) as MessageSinkRef;
        target
            .subscribe_event_handler(MsgTypeId::immutable::<Summary>(), as_sink)
            .unwrap();

        let transform_target = Arc::clone(&target);
        let limits = MessageLimits::new().any_unspecified_then_transform(1, move |payload| {
            payload.downcast_ref::<Job>().map(|_| TransformedMessage {
                mbox: Arc::clone(&transform_target),
                message: MessageRef::message(Summary),
            })
        });
        let set = LimitSet::build(limits).unwrap();

        let block = set.block_for(MsgTypeId::immutable::<Job>()).unwrap();
        assert!(block.try_acquire());
        assert!(!block.try_acquire());

        block
            .on_overflow(
                MboxId::from_raw(3),
                &MessageRef::message(Job),
                8,
                &TraceSink::default(),
            )
            .unwrap();
        assert_eq!(sink.received(), 1);
    }

    #[test]
    fn test_no_wildcard_means_unlimited_for_others() {
        let limits = MessageLimits::new().limit_then_drop::<Job>(1);
        let set = LimitSet::build(limits).unwrap();
        assert!(set.block_for(MsgTypeId::immutable::<Other>()).is_none());
    }
}
