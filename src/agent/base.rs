// Layer 1: Standard library imports
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;

// Layer 3: Internal module imports
use super::handler::EventHandler;
use super::runtime::AgentRuntime;
use super::state::{erase_state_hook, State, StateError, StateTree};
use super::traits::Agent;
use crate::coop::CoopRuntime;
use crate::dispatcher::event_queue::{EventQueueRef, ExecutionDemand};
use crate::env::Environment;
use crate::limit::{LimitSet, MessageLimits};
use crate::mbox::direct::DirectMbox;
use crate::mbox::{AbstractMbox, MboxError, MboxRef, MessageSink, MessageSinkRef};
use crate::message::{Message, MessageRef, MsgTypeId};
use crate::msg_tracing::{TraceAction, TraceSink};
use crate::subscription::storage::{SubscriptionError, SubscriptionKey, SubscriptionStorage};
use crate::subscription::StorageFactory;
use crate::timer::TimerId;
use crate::util::{AgentId, CoopId, MboxId, Priority};

/// Lifecycle status codes kept in `AgentShared::status`.
pub(crate) const STATUS_CONSTRUCTED: u8 = 0;
pub(crate) const STATUS_RUNNING: u8 = 1;
pub(crate) const STATUS_FINISHED: u8 = 2;

/// Where demands for an agent currently go.
///
/// `Buffering` covers the registration window: subscriptions already
/// exist but the dispatcher binding is not complete, so deliveries are
/// parked and flushed right after the `evt_start` demand. This way no
/// message sent during registration is lost and `evt_start` stays
/// strictly first.
pub(crate) enum QueueBinding {
    Detached,
    Buffering(VecDeque<ExecutionDemand>),
    Bound(EventQueueRef),
}

/// Attachment of an agent to its cooperation.
pub(crate) struct CoopAttachment {
    pub(crate) coop: Weak<CoopRuntime>,
    pub(crate) coop_id: CoopId,
}

/// The part of an agent's runtime half that other threads look at:
/// identity, environment handle, direct mbox, limits, priority and the
/// event-queue binding. Everything mutable here is atomic or behind its
/// own lock; the rest of the agent state lives in [`AgentBase`] inside
/// the agent cell.
pub(crate) struct AgentShared {
    id: AgentId,
    env: Environment,
    direct_mbox: Arc<DirectMbox>,
    tracer: TraceSink,
    priority: AtomicU8,
    limits: OnceLock<LimitSet>,
    queue: Mutex<QueueBinding>,
    status: AtomicU8,
    mt_context: AtomicBool,
    runtime: OnceLock<Weak<AgentRuntime>>,
    coop: OnceLock<CoopAttachment>,
}

impl AgentShared {
    pub(crate) fn id(&self) -> AgentId {
        self.id
    }

    pub(crate) fn env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn tracer(&self) -> &TraceSink {
        &self.tracer
    }

    pub(crate) fn priority(&self) -> Priority {
        let raw = self.priority.load(Ordering::Relaxed);
        Priority::all()
            .into_iter()
            .find(|p| p.index() == raw as usize)
            .unwrap_or(Priority::P0)
    }

    pub(crate) fn set_priority(&self, priority: Priority) {
        self.priority.store(priority.index() as u8, Ordering::Relaxed);
    }

    pub(crate) fn status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    pub(crate) fn set_status(&self, status: u8) {
        self.status.store(status, Ordering::Release);
    }

    pub(crate) fn mark_mt_context(&self) {
        self.mt_context.store(true, Ordering::Relaxed);
    }

    pub(crate) fn in_mt_context(&self) -> bool {
        self.mt_context.load(Ordering::Relaxed)
    }

    pub(crate) fn limits(&self) -> Option<&LimitSet> {
        self.limits.get()
    }

    pub(crate) fn direct_mbox(&self) -> &Arc<DirectMbox> {
        &self.direct_mbox
    }

    pub(crate) fn attach_runtime(&self, runtime: &Arc<AgentRuntime>) {
        let weak = Arc::downgrade(runtime);
        let _ = self.runtime.set(weak.clone());
        let sink: Weak<dyn MessageSink> = weak;
        self.direct_mbox.attach_owner(sink);
    }

    pub(crate) fn runtime(&self) -> Option<Arc<AgentRuntime>> {
        self.runtime.get().and_then(Weak::upgrade)
    }

    pub(crate) fn sink(&self) -> Option<MessageSinkRef> {
        self.runtime().map(|rt| {
            let sink: MessageSinkRef = rt;
            sink
        })
    }

    pub(crate) fn attach_coop(&self, coop: &Arc<CoopRuntime>) {
        let _ = self.coop.set(CoopAttachment {
            coop: Arc::downgrade(coop),
            coop_id: coop.id(),
        });
    }

    pub(crate) fn coop(&self) -> Option<Arc<CoopRuntime>> {
        self.coop.get().and_then(|a| a.coop.upgrade())
    }

    pub(crate) fn coop_id(&self) -> Option<CoopId> {
        self.coop.get().map(|a| a.coop_id)
    }

    /// Switch demand routing to the buffering mode (registration
    /// window).
    pub(crate) fn start_buffering(&self) {
        let mut queue = self.queue.lock();
        if matches!(*queue, QueueBinding::Detached) {
            *queue = QueueBinding::Buffering(VecDeque::new());
        }
    }

    /// Complete the binding: push the `evt_start` demand first, flush
    /// everything buffered during registration, switch to the real
    /// queue. Holding the binding lock for the whole flush keeps
    /// concurrent senders ordered after the buffered demands.
    pub(crate) fn bind_queue(&self, queue: EventQueueRef, start_demand: ExecutionDemand) {
        let mut binding = self.queue.lock();
        queue.push(start_demand);
        if let QueueBinding::Buffering(buffered) = &mut *binding {
            for demand in buffered.drain(..) {
                queue.push(demand);
            }
        }
        *binding = QueueBinding::Bound(queue);
    }

    /// Detach from the event queue (final deregistration).
    pub(crate) fn detach_queue(&self) {
        *self.queue.lock() = QueueBinding::Detached;
    }

    /// Route one demand according to the current binding. Returns false
    /// when the agent is detached and the demand was discarded.
    pub(crate) fn push_demand(&self, demand: ExecutionDemand) -> bool {
        let mut binding = self.queue.lock();
        match &mut *binding {
            QueueBinding::Detached => false,
            QueueBinding::Buffering(buffered) => {
                buffered.push_back(demand);
                true
            }
            QueueBinding::Bound(queue) => {
                queue.push(demand);
                true
            }
        }
    }
}

/// The runtime half every agent embeds.
///
/// Created by [`Coop::new_agent_base`](crate::coop::Coop::new_agent_base);
/// the user struct stores it and returns it from
/// [`Agent::so_base`]/[`Agent::so_base_mut`]. It owns the state tree,
/// the subscription storage and the delivery-filter bookkeeping.
pub struct AgentBase {
    shared: Arc<AgentShared>,
    states: StateTree,
    current_state: State,
    storage: Box<dyn SubscriptionStorage>,
    filters: HashMap<(MboxId, MsgTypeId), MboxRef>,
    state_timers: HashMap<State, TimerId>,
}

impl AgentBase {
    pub(crate) fn new(env: Environment) -> Self {
        let id = env.next_agent_id();
        let tracer = env.tracer_sink();
        let direct_mbox = Arc::new(DirectMbox::new(env.next_mbox_id(), id, tracer.clone()));
        let shared = Arc::new(AgentShared {
            id,
            env,
            direct_mbox,
            tracer,
            priority: AtomicU8::new(Priority::P0.index() as u8),
            limits: OnceLock::new(),
            queue: Mutex::new(QueueBinding::Detached),
            status: AtomicU8::new(STATUS_CONSTRUCTED),
            mt_context: AtomicBool::new(false),
            runtime: OnceLock::new(),
            coop: OnceLock::new(),
        });
        let states = StateTree::new(id);
        let current_state = states.default_state();
        Self {
            shared,
            states,
            current_state,
            storage: StorageFactory::default().create(),
            filters: HashMap::new(),
            state_timers: HashMap::new(),
        }
    }

    // -- identity and environment ------------------------------------

    /// Id of this agent.
    pub fn so_id(&self) -> AgentId {
        self.shared.id
    }

    /// Handle to the hosting environment.
    pub fn so_environment(&self) -> Environment {
        self.shared.env.clone()
    }

    /// The agent's own MPSC mbox.
    pub fn so_direct_mbox(&self) -> MboxRef {
        Arc::clone(&self.shared.direct_mbox) as MboxRef
    }

    /// Priority consumed by priority-aware dispatchers. Must be set
    /// before the agent's cooperation is registered.
    pub fn set_priority(&mut self, priority: Priority) {
        self.shared.set_priority(priority);
    }

    /// Current priority.
    pub fn priority(&self) -> Priority {
        self.shared.priority()
    }

    /// Declare message limits. Effective once; a second call is ignored
    /// with a warning. Must happen before registration.
    pub fn set_limits(&mut self, limits: MessageLimits) {
        if let Some(set) = LimitSet::build(limits) {
            if self.shared.limits.set(set).is_err() {
                tracing::warn!(agent = %self.shared.id, "message limits already set; ignored");
            }
        }
    }

    /// Replace the subscription-storage representation. Only possible
    /// while no subscription exists.
    pub fn use_storage(&mut self, factory: StorageFactory) {
        if self.storage.is_empty() {
            self.storage = factory.create();
        } else {
            tracing::warn!(
                agent = %self.shared.id,
                "subscription storage can only be replaced while empty; ignored"
            );
        }
    }

    // -- states -------------------------------------------------------

    /// The default state every agent starts in.
    pub fn so_default_state(&self) -> State {
        self.states.default_state()
    }

    /// The current leaf state.
    pub fn so_current_state(&self) -> State {
        self.current_state
    }

    /// Is `state` the current state or one of its ancestors?
    pub fn so_is_active_state(&self, state: State) -> bool {
        self.states.is_on_path(state, self.current_state)
    }

    /// Create a new top-level state.
    pub fn state(&mut self, name: impl Into<String>) -> Result<State, StateError> {
        self.states.add_state(name, None)
    }

    /// Create a substate of `parent`.
    pub fn substate(
        &mut self,
        name: impl Into<String>,
        parent: State,
    ) -> Result<State, StateError> {
        self.states.add_state(name, Some(parent))
    }

    /// Designate the initial substate of a composite state.
    pub fn initial_substate(&mut self, composite: State, child: State) -> Result<(), StateError> {
        self.states.set_initial_substate(composite, child)
    }

    /// Attach an enter hook to a state.
    pub fn on_enter<A: Agent>(
        &mut self,
        state: State,
        hook: impl Fn(&mut A) + Send + Sync + 'static,
    ) -> Result<(), StateError> {
        self.states.set_on_enter(state, erase_state_hook(hook))
    }

    /// Attach an exit hook to a state.
    pub fn on_exit<A: Agent>(
        &mut self,
        state: State,
        hook: impl Fn(&mut A) + Send + Sync + 'static,
    ) -> Result<(), StateError> {
        self.states.set_on_exit(state, erase_state_hook(hook))
    }

    /// Limit the time the agent may continuously stay in `state`; on
    /// expiry the agent moves to `target`.
    pub fn time_limit(
        &mut self,
        state: State,
        limit: Duration,
        target: State,
    ) -> Result<(), StateError> {
        self.states.set_time_limit(state, limit, target)
    }

    // -- delivery filters ---------------------------------------------

    /// Set a delivery filter for messages of type `M` from `mbox` to
    /// this agent.
    pub fn set_delivery_filter<M: Message>(
        &mut self,
        mbox: &MboxRef,
        filter: impl Fn(&M) -> bool + Send + Sync + 'static,
    ) -> Result<(), MboxError> {
        let msg_type = MsgTypeId::immutable::<M>();
        let erased: crate::mbox::DeliveryFilterFn = Arc::new(move |m: &MessageRef| {
            m.downcast_ref::<M>().map(&filter).unwrap_or(false)
        });
        mbox.set_delivery_filter(msg_type, self.shared.id, erased)?;
        self.filters
            .insert((mbox.id(), msg_type), Arc::clone(mbox));
        Ok(())
    }

    /// Remove the delivery filter for `M` on `mbox`. Idempotent.
    pub fn drop_delivery_filter<M: Message>(&mut self, mbox: &MboxRef) {
        let msg_type = MsgTypeId::immutable::<M>();
        mbox.drop_delivery_filter(msg_type, self.shared.id);
        self.filters.remove(&(mbox.id(), msg_type));
    }

    // -- subscriptions ------------------------------------------------

    /// Drop the subscription of `M` on `mbox` in `state`.
    pub fn so_drop_subscription<M: Message>(
        &mut self,
        mbox: &MboxRef,
        state: State,
    ) -> Result<(), SubscriptionError> {
        self.do_unsubscribe(mbox, MsgTypeId::immutable::<M>(), state)
    }

    /// Drop the subscriptions of `M` on `mbox` in every state.
    pub fn so_drop_subscription_for_all_states<M: Message>(&mut self, mbox: &MboxRef) {
        self.do_unsubscribe_all(mbox, MsgTypeId::immutable::<M>());
    }

    pub(crate) fn do_subscribe(
        &mut self,
        mbox: &MboxRef,
        msg_type: MsgTypeId,
        states: &[State],
        handler: EventHandler,
    ) -> Result<(), SubscriptionError> {
        let sink = self
            .shared
            .sink()
            .ok_or(SubscriptionError::AgentNotRegistered)?;
        for state in states {
            let key = SubscriptionKey {
                mbox_id: mbox.id(),
                msg_type,
                state: *state,
            };
            let outcome = self.storage.create(mbox, key, handler.clone())?;
            if outcome.first_for_mbox_type {
                if let Err(e) = mbox.subscribe_event_handler(msg_type, Arc::clone(&sink)) {
                    let _ = self.storage.drop_subscription(&key);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn do_unsubscribe(
        &mut self,
        mbox: &MboxRef,
        msg_type: MsgTypeId,
        state: State,
    ) -> Result<(), SubscriptionError> {
        let key = SubscriptionKey {
            mbox_id: mbox.id(),
            msg_type,
            state,
        };
        match self.storage.drop_subscription(&key) {
            Ok(outcome) => {
                if outcome.last_for_mbox_type {
                    outcome
                        .mbox
                        .unsubscribe_event_handler(msg_type, self.shared.id);
                }
                Ok(())
            }
            // Unsubscribing something that is not there is a no-op.
            Err(SubscriptionError::SubscriptionNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn do_unsubscribe_all(&mut self, mbox: &MboxRef, msg_type: MsgTypeId) {
        if let Some(mbox) = self.storage.drop_all_for_mbox_type(mbox.id(), msg_type) {
            mbox.unsubscribe_event_handler(msg_type, self.shared.id);
        }
    }

    /// Remove every subscription and delivery filter this agent holds.
    /// Runs during the final stage of the agent's life.
    pub(crate) fn drop_all_subscriptions(&mut self) {
        let mut seen: Vec<(MboxId, MsgTypeId)> = Vec::new();
        for record in self.storage.query_content() {
            let pair = record.key.pair();
            if !seen.contains(&pair) {
                seen.push(pair);
                record
                    .mbox
                    .unsubscribe_event_handler(record.key.msg_type, self.shared.id);
            }
        }
        self.storage.drop_content();
        for ((_, msg_type), mbox) in self.filters.drain() {
            mbox.drop_delivery_filter(msg_type, self.shared.id);
        }
        self.state_timers.clear();
    }

    /// Find the handler for a message in the current state, walking up
    /// the state tree (state inheritance: the deepest match wins).
    pub(crate) fn find_handler(&self, mbox_id: MboxId, msg_type: MsgTypeId) -> Option<EventHandler> {
        let mut state = Some(self.current_state);
        while let Some(s) = state {
            if let Some(handler) = self.storage.find_exact(mbox_id, msg_type, s) {
                return Some(handler);
            }
            state = self.states.parent_of(s);
        }
        None
    }

    // -- crate-internal plumbing --------------------------------------

    pub(crate) fn shared(&self) -> &Arc<AgentShared> {
        &self.shared
    }

    pub(crate) fn states(&self) -> &StateTree {
        &self.states
    }

    pub(crate) fn states_mut(&mut self) -> &mut StateTree {
        &mut self.states
    }

    pub(crate) fn set_current_state(&mut self, state: State) {
        self.current_state = state;
    }

    pub(crate) fn take_state_timer(&mut self, state: State) -> Option<TimerId> {
        self.state_timers.remove(&state)
    }

    pub(crate) fn put_state_timer(&mut self, state: State, timer: TimerId) {
        self.state_timers.insert(state, timer);
    }

    pub(crate) fn trace_dropped(&self, mbox_id: MboxId, msg_type: MsgTypeId, action: TraceAction) {
        self.shared.tracer.emit(
            mbox_id,
            || format!("<mbox:id={}>", mbox_id.raw()),
            msg_type,
            Some(self.shared.id),
            action,
        );
    }
}
