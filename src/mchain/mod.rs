//! Message chains: passive multi-producer queues consumed explicitly
//! with `receive`/`select`, typically from non-agent threads at the
//! boundary with hosting code.

pub mod select;

pub use select::{select, SelectCase, SelectParams};

// Layer 1: Standard library imports
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

// Layer 3: Internal module imports
use crate::mbox::traits::{
    AbstractMbox, DeliveryError, DeliveryFilterFn, MboxError, MboxType, MessageSinkRef,
};
use crate::message::envelope::FnInvoker;
use crate::message::payload::Payload;
use crate::message::{Message, MessageRef, MsgTypeId, Signal};
use crate::util::{AgentId, MboxId};
use select::SelectSignal;

/// How a bounded chain stores its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryUsage {
    /// Nodes are allocated on demand up to the size limit.
    #[default]
    Dynamic,
    /// The whole ring is allocated up front.
    Preallocated,
}

/// What a bounded chain does with a message that does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowReaction {
    /// Silently discard the new message.
    DropNewest,
    /// Discard the oldest queued message to make room.
    RemoveOldest,
    /// Report [`MchainError::Overflow`] to the sender.
    ThrowException,
    /// Terminate the process after logging.
    Abort,
}

/// Capacity mode of a chain.
#[derive(Clone)]
pub enum ChainCapacity {
    /// The chain accepts any number of messages.
    Unlimited,
    /// At most `max_size` messages; the overflow reaction (after the
    /// optional blocking wait) decides what happens to the excess.
    Bounded {
        /// Maximum number of queued messages.
        max_size: usize,
        /// Storage strategy.
        memory: MemoryUsage,
        /// Reaction to overflow.
        overflow: OverflowReaction,
        /// When set, a sender first blocks this long for free space;
        /// the reaction applies only after the wait times out.
        send_timeout: Option<Duration>,
    },
}

/// Chain construction parameters.
#[derive(Clone)]
pub struct MchainParams {
    capacity: ChainCapacity,
    not_empty_notificator: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl MchainParams {
    /// An unlimited chain.
    pub fn unlimited() -> Self {
        Self {
            capacity: ChainCapacity::Unlimited,
            not_empty_notificator: None,
        }
    }

    /// A bounded chain with the given size and overflow reaction.
    pub fn bounded(max_size: usize, memory: MemoryUsage, overflow: OverflowReaction) -> Self {
        Self {
            capacity: ChainCapacity::Bounded {
                max_size: max_size.max(1),
                memory,
                overflow,
                send_timeout: None,
            },
            not_empty_notificator: None,
        }
    }

    /// Let senders block up to `timeout` for free space before the
    /// overflow reaction applies. Bounded chains only.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        if let ChainCapacity::Bounded { send_timeout, .. } = &mut self.capacity {
            *send_timeout = Some(timeout);
        }
        self
    }

    /// Install a callback invoked whenever a message lands in an empty
    /// chain. Used to wake external event loops.
    pub fn with_not_empty_notificator(
        mut self,
        notificator: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.not_empty_notificator = Some(Arc::new(notificator));
        self
    }
}

/// What to do with still-queued messages at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Discard pending messages.
    DropContent,
    /// Let consumers drain pending messages; only new sends are
    /// rejected.
    RetainContent,
}

/// Errors reported to chain producers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MchainError {
    /// The chain is closed for new messages.
    #[error("message chain is closed")]
    Closed,

    /// The chain is full and configured to report overflow.
    #[error("message chain is full")]
    Overflow,
}

/// Status a receive operation finished with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// At least one message was extracted.
    MsgExtracted,
    /// The wait ended without a message.
    NoMessages,
    /// The chain is closed and drained.
    ChainClosed,
}

/// Outcome of `receive`/`receive_bulk`/`select`.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveResult {
    /// Messages taken out of the chain(s).
    pub extracted: usize,
    /// Messages a handler was found and run for.
    pub handled: usize,
    /// Final status.
    pub status: ExtractionStatus,
}

pub(crate) enum ExtractOutcome {
    Msg(MessageRef),
    Empty,
    Closed,
}

struct ChainInner {
    queue: VecDeque<MessageRef>,
    closed: Option<CloseMode>,
    waiters: Vec<Weak<SelectSignal>>,
}

/// Shared handle to a message chain.
pub type MchainRef = Arc<Mchain>;

/// A multi-producer passive queue with bounded or unbounded backlog.
///
/// Producers use [`Mchain::send`] (or the mbox facade via
/// [`Mchain::as_mbox`], which routes through the normal delivery
/// path); consumers call [`receive`]/[`receive_bulk`]/[`select`].
pub struct Mchain {
    id: MboxId,
    capacity: ChainCapacity,
    inner: Mutex<ChainInner>,
    not_empty: Condvar,
    not_full: Condvar,
    notificator: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Mchain {
    pub(crate) fn new(id: MboxId, params: MchainParams) -> MchainRef {
        let queue = match &params.capacity {
            ChainCapacity::Bounded {
                max_size,
                memory: MemoryUsage::Preallocated,
                ..
            } => VecDeque::with_capacity(*max_size),
            _ => VecDeque::new(),
        };
        Arc::new(Self {
            id,
            capacity: params.capacity,
            inner: Mutex::new(ChainInner {
                queue,
                closed: None,
                waiters: Vec::new(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            notificator: params.not_empty_notificator,
        })
    }

    /// Id of the chain (also the id of its mbox facade).
    pub fn id(&self) -> MboxId {
        self.id
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Is the chain currently empty?
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Has the chain been closed?
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    /// Send an immutable message into the chain.
    pub fn send<M: Message>(&self, message: M) -> Result<(), MchainError> {
        self.push(MessageRef::message(message))
    }

    /// Send a mutable message into the chain.
    pub fn send_mutable<M: Message>(&self, message: M) -> Result<(), MchainError> {
        self.push(MessageRef::mutable_message(message))
    }

    /// Send a signal into the chain.
    pub fn send_signal<S: Signal>(&self) -> Result<(), MchainError> {
        self.push(MessageRef::signal::<S>())
    }

    /// The sending facade: lets the chain stand wherever an mbox is
    /// expected (timers, limit redirects, agent sends).
    pub fn as_mbox(self: &Arc<Self>) -> crate::mbox::MboxRef {
        Arc::clone(self) as crate::mbox::MboxRef
    }

    pub(crate) fn push(&self, message: MessageRef) -> Result<(), MchainError> {
        let mut inner = self.inner.lock();
        if inner.closed.is_some() {
            return Err(MchainError::Closed);
        }

        if let ChainCapacity::Bounded {
            max_size,
            overflow,
            send_timeout,
            ..
        } = &self.capacity
        {
            if inner.queue.len() >= *max_size {
                if let Some(timeout) = send_timeout {
                    let deadline = Instant::now() + *timeout;
                    while inner.queue.len() >= *max_size && inner.closed.is_none() {
                        if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                            break;
                        }
                    }
                    if inner.closed.is_some() {
                        return Err(MchainError::Closed);
                    }
                }
                if inner.queue.len() >= *max_size {
                    match overflow {
                        OverflowReaction::DropNewest => return Ok(()),
                        OverflowReaction::RemoveOldest => {
                            inner.queue.pop_front();
                        }
                        OverflowReaction::ThrowException => return Err(MchainError::Overflow),
                        OverflowReaction::Abort => {
                            tracing::error!(chain = %self.id, "message chain overflow with abort reaction");
                            std::process::abort();
                        }
                    }
                }
            }
        }

        let was_empty = inner.queue.is_empty();
        inner.queue.push_back(message);
        if was_empty {
            self.not_empty.notify_all();
            wake_waiters(&mut inner.waiters);
            let notificator = self.notificator.clone();
            drop(inner);
            if let Some(notificator) = notificator {
                notificator();
            }
        }
        Ok(())
    }

    /// Close the chain. Further sends are rejected; blocked producers
    /// and waiting consumers wake up.
    pub fn close(&self, mode: CloseMode) {
        let mut inner = self.inner.lock();
        if inner.closed.is_some() {
            return;
        }
        inner.closed = Some(mode);
        if mode == CloseMode::DropContent {
            inner.queue.clear();
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
        wake_waiters(&mut inner.waiters);
    }

    pub(crate) fn try_extract(&self) -> ExtractOutcome {
        let mut inner = self.inner.lock();
        match inner.queue.pop_front() {
            Some(message) => {
                self.not_full.notify_one();
                ExtractOutcome::Msg(message)
            }
            None if inner.closed.is_some() => ExtractOutcome::Closed,
            None => ExtractOutcome::Empty,
        }
    }

    pub(crate) fn extract_timed(&self, deadline: Option<Instant>) -> ExtractOutcome {
        let mut inner = self.inner.lock();
        loop {
            if let Some(message) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return ExtractOutcome::Msg(message);
            }
            if inner.closed.is_some() {
                return ExtractOutcome::Closed;
            }
            match deadline {
                None => return ExtractOutcome::Empty,
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                        if inner.queue.is_empty() && inner.closed.is_none() {
                            return ExtractOutcome::Empty;
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn add_waiter(&self, waiter: Weak<SelectSignal>) {
        self.inner.lock().waiters.push(waiter);
    }
}

fn wake_waiters(waiters: &mut Vec<Weak<SelectSignal>>) {
    waiters.retain(|weak| match weak.upgrade() {
        Some(signal) => {
            signal.notify();
            true
        }
        None => false,
    });
}

impl AbstractMbox for Mchain {
    fn id(&self) -> MboxId {
        self.id
    }

    fn mbox_type(&self) -> MboxType {
        MboxType::MultiProducerSingleConsumer
    }

    fn name(&self) -> String {
        format!("<mchain:id={}>", self.id.raw())
    }

    fn subscribe_event_handler(
        &self,
        _msg_type: MsgTypeId,
        _sink: MessageSinkRef,
    ) -> Result<(), MboxError> {
        Err(MboxError::NotSupported {
            mbox: self.id,
            operation: "subscribe_event_handler",
        })
    }

    fn unsubscribe_event_handler(&self, _msg_type: MsgTypeId, _sink_id: AgentId) {}

    fn set_delivery_filter(
        &self,
        _msg_type: MsgTypeId,
        _sink_id: AgentId,
        _filter: DeliveryFilterFn,
    ) -> Result<(), MboxError> {
        Err(MboxError::NotSupported {
            mbox: self.id,
            operation: "set_delivery_filter",
        })
    }

    fn drop_delivery_filter(&self, _msg_type: MsgTypeId, _sink_id: AgentId) {}

    fn deliver(&self, message: MessageRef, _redirection_deep: u32) -> Result<(), DeliveryError> {
        self.push(message).map_err(|e| match e {
            MchainError::Closed => DeliveryError::ChainClosed { mbox: self.id },
            MchainError::Overflow => DeliveryError::ChainOverflow { mbox: self.id },
        })
    }
}

/// Per-type message handlers for chain consumption.
///
/// # Example
/// ```rust,ignore
/// let mut handlers = MsgHandlerSet::new()
///     .on::<Done>(|d| println!("done: {}", d.task))
///     .on_signal::<Quit>(|| println!("quit"));
/// receive(&chain, Duration::from_secs(1), &mut handlers);
/// ```
#[derive(Default)]
pub struct MsgHandlerSet {
    handlers: HashMap<MsgTypeId, Box<dyn FnMut(&MessageRef) + Send>>,
}

impl MsgHandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle messages of type `M`.
    pub fn on<M: Message>(mut self, mut handler: impl FnMut(&M) + Send + 'static) -> Self {
        self.handlers.insert(
            MsgTypeId::immutable::<M>(),
            Box::new(move |message: &MessageRef| {
                if let Some(payload) = message.downcast_ref::<M>() {
                    handler(payload);
                }
            }),
        );
        self
    }

    /// Handle mutable messages of type `M`.
    pub fn on_mutable<M: Message>(
        mut self,
        mut handler: impl FnMut(&mut M) + Send + 'static,
    ) -> Self {
        self.handlers.insert(
            MsgTypeId::mutable::<M>(),
            Box::new(move |message: &MessageRef| {
                message.with_mutable::<M, _>(|payload| handler(payload));
            }),
        );
        self
    }

    /// Handle signals of type `S`.
    pub fn on_signal<S: Signal>(mut self, mut handler: impl FnMut() + Send + 'static) -> Self {
        self.handlers.insert(
            MsgTypeId::immutable::<S>(),
            Box::new(move |_message: &MessageRef| handler()),
        );
        self
    }

    /// Dispatch one extracted message; returns true when a handler ran.
    /// Envelopes get their per-consumer `handler_found_hook` here.
    pub(crate) fn dispatch(&mut self, message: &MessageRef) -> bool {
        let Some(handler) = self.handlers.get_mut(&message.type_tag()) else {
            return false;
        };
        match message.payload() {
            Payload::Envelope(envelope) => {
                let mut handled = false;
                let mut call = |inner: &MessageRef| {
                    handled = true;
                    handler(inner);
                };
                envelope.handler_found_hook(&mut FnInvoker::new(&mut call));
                handled
            }
            _ => {
                handler(message);
                true
            }
        }
    }
}

/// Receive one message, waiting up to `wait` for it.
pub fn receive(chain: &MchainRef, wait: Duration, handlers: &mut MsgHandlerSet) -> ReceiveResult {
    let deadline = Instant::now() + wait;
    match chain.extract_timed(Some(deadline)) {
        ExtractOutcome::Msg(message) => {
            let handled = handlers.dispatch(&message);
            ReceiveResult {
                extracted: 1,
                handled: usize::from(handled),
                status: ExtractionStatus::MsgExtracted,
            }
        }
        ExtractOutcome::Empty => ReceiveResult {
            extracted: 0,
            handled: 0,
            status: ExtractionStatus::NoMessages,
        },
        ExtractOutcome::Closed => ReceiveResult {
            extracted: 0,
            handled: 0,
            status: ExtractionStatus::ChainClosed,
        },
    }
}

/// Parameters of a bulk receive.
#[derive(Default, Clone)]
pub struct ReceiveParams {
    /// Stop after this many handled messages.
    pub handle_n: Option<usize>,
    /// Stop after this many extracted messages.
    pub extract_n: Option<usize>,
    /// How long to wait on an empty chain before giving up.
    pub empty_timeout: Option<Duration>,
    /// Overall time budget.
    pub total_time: Option<Duration>,
    /// Custom stop predicate, checked between messages.
    pub stop_on: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl ReceiveParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after `n` handled messages.
    pub fn handle_n(mut self, n: usize) -> Self {
        self.handle_n = Some(n);
        self
    }

    /// Stop after `n` extracted messages.
    pub fn extract_n(mut self, n: usize) -> Self {
        self.extract_n = Some(n);
        self
    }

    /// Give up after waiting this long on an empty chain.
    pub fn empty_timeout(mut self, timeout: Duration) -> Self {
        self.empty_timeout = Some(timeout);
        self
    }

    /// Overall time budget for the whole bulk receive.
    pub fn total_time(mut self, time: Duration) -> Self {
        self.total_time = Some(time);
        self
    }

    /// Stop as soon as the predicate returns true.
    pub fn stop_on(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.stop_on = Some(Arc::new(predicate));
        self
    }
}

/// Consume messages until a limit, the time budget, the stop predicate
/// or chain closure ends the loop.
pub fn receive_bulk(
    chain: &MchainRef,
    params: &ReceiveParams,
    handlers: &mut MsgHandlerSet,
) -> ReceiveResult {
    let total_deadline = params.total_time.map(|t| Instant::now() + t);
    let mut extracted = 0usize;
    let mut handled = 0usize;
    let mut status = ExtractionStatus::NoMessages;

    loop {
        if let Some(stop) = &params.stop_on {
            if stop() {
                break;
            }
        }
        if params.handle_n.is_some_and(|n| handled >= n)
            || params.extract_n.is_some_and(|n| extracted >= n)
        {
            break;
        }

        let wait_deadline = {
            let empty = params.empty_timeout.map(|t| Instant::now() + t);
            match (empty, total_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            }
        };
        if let Some(total) = total_deadline {
            if Instant::now() >= total {
                break;
            }
        }

        match chain.extract_timed(wait_deadline) {
            ExtractOutcome::Msg(message) => {
                extracted += 1;
                if handlers.dispatch(&message) {
                    handled += 1;
                }
                status = ExtractionStatus::MsgExtracted;
            }
            ExtractOutcome::Empty => break,
            ExtractOutcome::Closed => {
                status = ExtractionStatus::ChainClosed;
                break;
            }
        }
    }

    ReceiveResult {
        extracted,
        handled,
        status,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Job {
        id: u32,
    }

    struct Stop;
    impl Signal for Stop {}

    fn chain(params: MchainParams) -> MchainRef {
        Mchain::new(MboxId::from_raw(5), params)
    }

    #[test]
    fn test_send_receive_roundtrip() {
        let ch = chain(MchainParams::unlimited());
        ch.send(Job { id: 1 }).unwrap();
        ch.send(Job { id: 2 }).unwrap();

        let mut seen = Vec::new();
        let collected = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&collected);
        let mut handlers = MsgHandlerSet::new().on::<Job>(move |j| sink.lock().push(j.id));

        for _ in 0..2 {
            let r = receive(&ch, Duration::from_millis(50), &mut handlers);
            assert_eq!(r.status, ExtractionStatus::MsgExtracted);
            assert_eq!(r.handled, 1);
        }
        seen.extend(collected.lock().iter().copied());
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_receive_timeout_on_empty_chain() {
        let ch = chain(MchainParams::unlimited());
        let mut handlers = MsgHandlerSet::new().on::<Job>(|_| {});

        let started = Instant::now();
        let r = receive(&ch, Duration::from_millis(40), &mut handlers);
        assert_eq!(r.status, ExtractionStatus::NoMessages);
        assert!(started.elapsed() >= Duration::from_millis(35));
    }

    #[test]
    fn test_signal_dispatch() {
        let ch = chain(MchainParams::unlimited());
        ch.send_signal::<Stop>().unwrap();

        let got = std::sync::Arc::new(Mutex::new(false));
        let flag = std::sync::Arc::clone(&got);
        let mut handlers = MsgHandlerSet::new().on_signal::<Stop>(move || *flag.lock() = true);

        let r = receive(&ch, Duration::from_millis(50), &mut handlers);
        assert_eq!(r.handled, 1);
        assert!(*got.lock());
    }

    #[test]
    fn test_unhandled_type_counts_extracted_only() {
        let ch = chain(MchainParams::unlimited());
        ch.send(Job { id: 1 }).unwrap();

        let mut handlers = MsgHandlerSet::new().on_signal::<Stop>(|| {});
        let r = receive(&ch, Duration::from_millis(20), &mut handlers);
        assert_eq!(r.extracted, 1);
        assert_eq!(r.handled, 0);
    }

    #[test]
    fn test_bounded_drop_newest() {
        let ch = chain(MchainParams::bounded(
            2,
            MemoryUsage::Dynamic,
            OverflowReaction::DropNewest,
        ));
        ch.send(Job { id: 1 }).unwrap();
        ch.send(Job { id: 2 }).unwrap();
        ch.send(Job { id: 3 }).unwrap();
        assert_eq!(ch.len(), 2);

        let kept = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&kept);
        let mut handlers = MsgHandlerSet::new().on::<Job>(move |j| sink.lock().push(j.id));
        receive_bulk(&ch, &ReceiveParams::new(), &mut handlers);
        assert_eq!(*kept.lock(), vec![1, 2]);
    }

    #[test]
    fn test_bounded_remove_oldest() {
        let ch = chain(MchainParams::bounded(
            2,
            MemoryUsage::Preallocated,
            OverflowReaction::RemoveOldest,
        ));
        ch.send(Job { id: 1 }).unwrap();
        ch.send(Job { id: 2 }).unwrap();
        ch.send(Job { id: 3 }).unwrap();

        let kept = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&kept);
        let mut handlers = MsgHandlerSet::new().on::<Job>(move |j| sink.lock().push(j.id));
        receive_bulk(&ch, &ReceiveParams::new(), &mut handlers);
        assert_eq!(*kept.lock(), vec![2, 3]);
    }

    #[test]
    fn test_bounded_throw() {
        let ch = chain(MchainParams::bounded(
            1,
            MemoryUsage::Dynamic,
            OverflowReaction::ThrowException,
        ));
        ch.send(Job { id: 1 }).unwrap();
        assert_eq!(ch.send(Job { id: 2 }), Err(MchainError::Overflow));
    }

    #[test]
    fn test_blocking_send_waits_for_space() {
        let ch = chain(
            MchainParams::bounded(1, MemoryUsage::Dynamic, OverflowReaction::ThrowException)
                .with_send_timeout(Duration::from_secs(2)),
        );
        ch.send(Job { id: 1 }).unwrap();

        let producer = {
            let ch = std::sync::Arc::clone(&ch);
            std::thread::spawn(move || ch.send(Job { id: 2 }))
        };
        std::thread::sleep(Duration::from_millis(50));

        let mut handlers = MsgHandlerSet::new().on::<Job>(|_| {});
        receive(&ch, Duration::from_millis(100), &mut handlers);

        assert!(producer.join().unwrap().is_ok());
        assert_eq!(ch.len(), 1);
    }

    #[test]
    fn test_close_drop_discards_content() {
        let ch = chain(MchainParams::unlimited());
        ch.send(Job { id: 1 }).unwrap();
        ch.close(CloseMode::DropContent);

        assert_eq!(ch.send(Job { id: 2 }), Err(MchainError::Closed));
        let mut handlers = MsgHandlerSet::new().on::<Job>(|_| {});
        let r = receive(&ch, Duration::from_millis(10), &mut handlers);
        assert_eq!(r.status, ExtractionStatus::ChainClosed);
    }

    #[test]
    fn test_close_retain_lets_consumer_drain() {
        let ch = chain(MchainParams::unlimited());
        ch.send(Job { id: 1 }).unwrap();
        ch.close(CloseMode::RetainContent);

        let mut handlers = MsgHandlerSet::new().on::<Job>(|_| {});
        let r = receive(&ch, Duration::from_millis(10), &mut handlers);
        assert_eq!(r.status, ExtractionStatus::MsgExtracted);

        let r = receive(&ch, Duration::from_millis(10), &mut handlers);
        assert_eq!(r.status, ExtractionStatus::ChainClosed);
    }

    #[test]
    fn test_close_unblocks_waiting_consumer() {
        let ch = chain(MchainParams::unlimited());
        let consumer = {
            let ch = std::sync::Arc::clone(&ch);
            std::thread::spawn(move || {
                let mut handlers = MsgHandlerSet::new().on::<Job>(|_| {});
                receive(&ch, Duration::from_secs(5), &mut handlers)
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        ch.close(CloseMode::DropContent);

        let r = consumer.join().unwrap();
        assert_eq!(r.status, ExtractionStatus::ChainClosed);
    }

    #[test]
    fn test_not_empty_notificator_fires_on_first_insert() {
        let count = std::sync::Arc::new(Mutex::new(0usize));
        let observed = std::sync::Arc::clone(&count);
        let ch = chain(
            MchainParams::unlimited().with_not_empty_notificator(move || *observed.lock() += 1),
        );

        ch.send(Job { id: 1 }).unwrap();
        ch.send(Job { id: 2 }).unwrap();
        assert_eq!(*count.lock(), 1);

        let mut handlers = MsgHandlerSet::new().on::<Job>(|_| {});
        receive_bulk(&ch, &ReceiveParams::new(), &mut handlers);
        ch.send(Job { id: 3 }).unwrap();
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_receive_bulk_handle_n() {
        let ch = chain(MchainParams::unlimited());
        for i in 0..10 {
            ch.send(Job { id: i }).unwrap();
        }
        let mut handlers = MsgHandlerSet::new().on::<Job>(|_| {});
        let r = receive_bulk(&ch, &ReceiveParams::new().handle_n(4), &mut handlers);
        assert_eq!(r.handled, 4);
        assert_eq!(ch.len(), 6);
    }

    #[test]
    fn test_mbox_facade_rejects_subscriptions() {
        let ch = chain(MchainParams::unlimited());
        let mbox = ch.as_mbox();
        assert_eq!(mbox.id(), ch.id());

        let sink = crate::mbox::null_sink::CountingSink::shared(AgentId::from_raw(1));
        let as_sink: MessageSinkRef = sink;
        let r = mbox.subscribe_event_handler(MsgTypeId::immutable::<Job>(), as_sink);
        assert!(matches!(r, Err(MboxError::NotSupported { .. })));
    }

    #[test]
    fn test_mbox_facade_delivers_into_chain() {
        let ch = chain(MchainParams::unlimited());
        let mbox = ch.as_mbox();
        mbox.deliver(MessageRef::message(Job { id: 9 }), 32).unwrap();
        assert_eq!(ch.len(), 1);

        ch.close(CloseMode::RetainContent);
        let r = mbox.deliver(MessageRef::message(Job { id: 10 }), 32);
        assert!(matches!(r, Err(DeliveryError::ChainClosed { .. })));
    }
}
