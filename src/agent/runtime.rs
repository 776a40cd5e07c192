// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::RwLock;

// Layer 3: Internal module imports
use super::base::{AgentShared, STATUS_FINISHED};
use super::handler::{
    EventHandler, ExclusiveFn, HandlerError, HandlerResult, HandlerInvoker, SharedFn, ThreadSafety,
};
use super::state::{State, StateError, StateHook, TimeLimitElapsed};
use super::traits::{Agent, ExceptionReaction};
use crate::dispatcher::event_queue::{DemandKind, ExecutionDemand};
use crate::limit::LimitGuard;
use crate::mbox::traits::AbstractMbox;
use crate::mbox::{DeliveryError, MboxRef, MessageSink};
use crate::message::payload::Payload;
use crate::message::envelope::FnInvoker;
use crate::message::{MessageRef, MsgTypeId, Signal};
use crate::msg_tracing::{TraceAction, TraceSink};
use crate::util::{AgentId, MboxId, Priority};

/// Payload-less service type used for `evt_start`/`evt_finish` demands.
pub(crate) struct LifecycleSignal;
impl Signal for LifecycleSignal {}

/// The runtime wrapper around one user agent; dispatcher binders work
/// in terms of this type.
///
/// The agent itself lives in an `RwLock` cell: exclusive handlers and
/// lifecycle hooks run under the write lock, thread-safe handlers under
/// the read lock. That lock is the whole story of handler thread
/// safety; dispatchers only decide how much blocking the locks see.
pub struct AgentRuntime {
    shared: Arc<AgentShared>,
    cell: RwLock<Box<dyn Agent>>,
}

impl AgentRuntime {
    pub(crate) fn new(agent: Box<dyn Agent>) -> Arc<Self> {
        let shared = Arc::clone(agent.so_base().shared());
        let runtime = Arc::new(Self {
            shared,
            cell: RwLock::new(agent),
        });
        runtime.shared.attach_runtime(&runtime);
        runtime
    }

    /// Id of the wrapped agent.
    pub fn id(&self) -> AgentId {
        self.shared.id()
    }

    /// Declared priority of the wrapped agent.
    pub fn priority(&self) -> Priority {
        self.shared.priority()
    }

    pub(crate) fn shared(&self) -> &Arc<AgentShared> {
        &self.shared
    }

    /// Run `so_define_agent` (during cooperation registration).
    pub(crate) fn call_define(&self) -> HandlerResult {
        let mut cell = self.cell.write();
        let result = cell.so_define_agent();
        if result.is_ok() {
            cell.so_base_mut().states_mut().freeze();
        }
        result
    }

    /// Undo a failed registration: drop whatever `so_define_agent`
    /// managed to subscribe.
    pub(crate) fn rollback_define(&self) {
        self.cell.write().so_base_mut().drop_all_subscriptions();
    }

    /// Build a lifecycle (`evt_start`/`evt_finish`) demand for this
    /// agent.
    pub(crate) fn lifecycle_demand(self: &Arc<Self>, kind: DemandKind) -> ExecutionDemand {
        ExecutionDemand::new(
            Arc::clone(self),
            self.shared.direct_mbox().id(),
            MessageRef::signal::<LifecycleSignal>(),
            kind,
            LimitGuard::none(),
        )
    }

    /// Resolve a demand to the thread safety of the handler it will
    /// run. Used by the advanced thread pool to schedule thread-safe
    /// handlers concurrently.
    pub(crate) fn hint_thread_safety(&self, demand: &ExecutionDemand) -> ThreadSafety {
        if demand.kind != DemandKind::Message {
            return ThreadSafety::NotSafe;
        }
        match self.cell.try_read() {
            Some(cell) => cell
                .so_base()
                .find_handler(demand.mbox_id, demand.message.type_tag())
                .map(|h| h.thread_safety())
                .unwrap_or(ThreadSafety::NotSafe),
            None => ThreadSafety::NotSafe,
        }
    }

    /// Execute one demand on the calling worker thread.
    pub(crate) fn exec_demand(&self, demand: ExecutionDemand) {
        match demand.kind {
            DemandKind::EvtStart => {
                let mut cell = self.cell.write();
                if let Err(error) = cell.so_evt_start() {
                    let reaction = resolve_reaction(&**cell, &self.shared);
                    drop(cell);
                    self.apply_reaction(reaction, error);
                }
            }
            DemandKind::EvtFinish => {
                {
                    let mut cell = self.cell.write();
                    if let Err(error) = cell.so_evt_finish() {
                        tracing::warn!(
                            agent = %self.shared.id(),
                            error = %error,
                            "error from so_evt_finish ignored"
                        );
                    }
                    cell.so_base_mut().drop_all_subscriptions();
                }
                self.shared.set_status(STATUS_FINISHED);
                self.shared.detach_queue();
                if let Some(coop) = self.shared.coop() {
                    coop.agent_finished();
                }
            }
            DemandKind::Message => self.exec_message(demand),
        }
    }

    fn exec_message(&self, demand: ExecutionDemand) {
        if self.shared.status() == STATUS_FINISHED {
            return;
        }
        let msg_type = demand.message.type_tag();
        if msg_type == MsgTypeId::immutable::<TimeLimitElapsed>() {
            self.exec_time_limit(&demand);
            return;
        }

        // First pass under the read lock; thread-safe handlers run
        // right here, possibly in parallel with each other.
        let read = self.cell.read();
        let Some(handler) = read.so_base().find_handler(demand.mbox_id, msg_type) else {
            read.so_base()
                .trace_dropped(demand.mbox_id, msg_type, TraceAction::DroppedNoHandler);
            return;
        };
        match handler.invoker {
            HandlerInvoker::ThreadSafe(f) => {
                let result = invoke_shared(
                    &**read,
                    &f,
                    &demand.message,
                    self.shared.tracer(),
                    demand.mbox_id,
                );
                if let Err(error) = result {
                    let reaction = resolve_reaction(&**read, &self.shared);
                    drop(read);
                    self.apply_reaction(reaction, error);
                }
            }
            HandlerInvoker::Exclusive(_) => {
                drop(read);
                let mut cell = self.cell.write();
                if self.shared.status() == STATUS_FINISHED {
                    return;
                }
                // The state may have moved between the two locks; look
                // the handler up again.
                let Some(handler) = cell.so_base().find_handler(demand.mbox_id, msg_type) else {
                    cell.so_base().trace_dropped(
                        demand.mbox_id,
                        msg_type,
                        TraceAction::DroppedNoHandler,
                    );
                    return;
                };
                let result = match handler.invoker {
                    HandlerInvoker::Exclusive(f) => invoke_exclusive(
                        &mut **cell,
                        &f,
                        &demand.message,
                        self.shared.tracer(),
                        demand.mbox_id,
                    ),
                    HandlerInvoker::ThreadSafe(f) => invoke_shared(
                        &**cell,
                        &f,
                        &demand.message,
                        self.shared.tracer(),
                        demand.mbox_id,
                    ),
                };
                if let Err(error) = result {
                    let reaction = resolve_reaction(&**cell, &self.shared);
                    self.apply_reaction(reaction, error);
                }
            }
        }
    }

    fn exec_time_limit(&self, demand: &ExecutionDemand) {
        let Some(elapsed) = demand.message.downcast_ref::<TimeLimitElapsed>() else {
            return;
        };
        let mut cell = self.cell.write();
        if self.shared.status() == STATUS_FINISHED {
            return;
        }
        let target = {
            let base = cell.so_base();
            if base.so_is_active_state(elapsed.state) {
                base.states().time_limit_of(elapsed.state).map(|(_, t)| t)
            } else {
                None
            }
        };
        if let Some(target) = target {
            if let Err(error) = change_agent_state(&mut **cell, target) {
                tracing::error!(
                    agent = %self.shared.id(),
                    error = %error,
                    "state time-limit transition failed"
                );
            }
        }
    }

    fn apply_reaction(&self, reaction: ExceptionReaction, error: HandlerError) {
        let agent = self.shared.id();
        if self.shared.in_mt_context()
            && matches!(
                reaction,
                ExceptionReaction::ShutdownEnvironment | ExceptionReaction::DeregisterCoop
            )
        {
            tracing::error!(
                %agent,
                ?reaction,
                "exception reaction is illegal for a multithreaded dispatcher"
            );
            std::process::abort();
        }
        match reaction {
            ExceptionReaction::Ignore => {
                tracing::warn!(%agent, error = %error, "handler error ignored");
            }
            ExceptionReaction::ShutdownEnvironment => {
                tracing::error!(%agent, error = %error, "handler error; stopping environment");
                self.shared.env().stop();
            }
            ExceptionReaction::DeregisterCoop => {
                tracing::error!(%agent, error = %error, "handler error; deregistering coop");
                if let Some(coop) = self.shared.coop() {
                    coop.initiate_deregistration(crate::coop::DeregReason::UnhandledException);
                }
            }
            ExceptionReaction::Abort | ExceptionReaction::Inherit => {
                tracing::error!(%agent, error = %error, "aborting on unhandled handler error");
                std::process::abort();
            }
        }
    }
}

impl MessageSink for AgentRuntime {
    fn sink_id(&self) -> AgentId {
        self.shared.id()
    }

    fn push_event(
        &self,
        mbox_id: MboxId,
        message: MessageRef,
        redirection_deep: u32,
    ) -> Result<(), DeliveryError> {
        if self.shared.status() == STATUS_FINISHED {
            self.trace(mbox_id, &message, TraceAction::DroppedAgentFinished);
            return Ok(());
        }
        let guard = match self
            .shared
            .limits()
            .and_then(|l| l.block_for(message.type_tag()))
        {
            Some(block) => {
                if block.try_acquire() {
                    LimitGuard::acquired(block)
                } else {
                    return block.on_overflow(
                        mbox_id,
                        &message,
                        redirection_deep,
                        self.shared.tracer(),
                    );
                }
            }
            None => LimitGuard::none(),
        };
        let Some(me) = self.shared.runtime() else {
            return Ok(());
        };
        let tag = message.type_tag();
        let demand = ExecutionDemand::new(me, mbox_id, message, DemandKind::Message, guard);
        if self.shared.push_demand(demand) {
            self.trace_tag(mbox_id, tag, TraceAction::PushedToQueue);
        } else {
            self.trace_tag(mbox_id, tag, TraceAction::DroppedDetached);
        }
        Ok(())
    }
}

impl AgentRuntime {
    fn trace(&self, mbox_id: MboxId, message: &MessageRef, action: TraceAction) {
        self.trace_tag(mbox_id, message.type_tag(), action);
    }

    fn trace_tag(&self, mbox_id: MboxId, msg_type: MsgTypeId, action: TraceAction) {
        self.shared.tracer().emit(
            mbox_id,
            || format!("<mbox:id={}>", mbox_id.raw()),
            msg_type,
            Some(self.shared.id()),
            action,
        );
    }
}

fn resolve_reaction(agent: &dyn Agent, shared: &AgentShared) -> ExceptionReaction {
    match agent.so_exception_reaction() {
        ExceptionReaction::Inherit => match shared.coop() {
            Some(coop) => coop.exception_reaction(),
            None => shared.env().default_exception_reaction(),
        },
        concrete => concrete,
    }
}

fn invoke_exclusive(
    agent: &mut dyn Agent,
    f: &ExclusiveFn,
    message: &MessageRef,
    tracer: &TraceSink,
    mbox_id: MboxId,
) -> HandlerResult {
    match message.payload() {
        Payload::Envelope(envelope) => {
            let mut outcome: HandlerResult = Ok(());
            let mut invoked = false;
            {
                let mut call = |inner: &MessageRef| {
                    invoked = true;
                    outcome = f(&mut *agent, inner);
                };
                envelope.handler_found_hook(&mut FnInvoker::new(&mut call));
            }
            if !invoked {
                tracer.emit(
                    mbox_id,
                    || format!("<mbox:id={}>", mbox_id.raw()),
                    message.type_tag(),
                    None,
                    TraceAction::DiscardedByEnvelope,
                );
            }
            outcome
        }
        _ => f(agent, message),
    }
}

fn invoke_shared(
    agent: &dyn Agent,
    f: &SharedFn,
    message: &MessageRef,
    tracer: &TraceSink,
    mbox_id: MboxId,
) -> HandlerResult {
    match message.payload() {
        Payload::Envelope(envelope) => {
            let mut outcome: HandlerResult = Ok(());
            let mut invoked = false;
            {
                let mut call = |inner: &MessageRef| {
                    invoked = true;
                    outcome = f(agent, inner);
                };
                envelope.handler_found_hook(&mut FnInvoker::new(&mut call));
            }
            if !invoked {
                tracer.emit(
                    mbox_id,
                    || format!("<mbox:id={}>", mbox_id.raw()),
                    message.type_tag(),
                    None,
                    TraceAction::DiscardedByEnvelope,
                );
            }
            outcome
        }
        _ => f(agent, message),
    }
}

/// Move an agent to `target`, honoring the hierarchical state-machine
/// semantics:
///
/// 1. Resolve `target` to a leaf by descending initial substates.
/// 2. Find the lowest common ancestor of the current leaf and the
///    target leaf.
/// 3. Run `on_exit` from the current leaf up to (excluding) the LCA.
/// 4. Run `on_enter` from below the LCA down to the target leaf.
/// 5. Cancel time limits of exited states, arm time limits of entered
///    ones.
pub(crate) fn change_agent_state(agent: &mut dyn Agent, target: State) -> Result<(), StateError> {
    struct EnterAction {
        state: State,
        hook: Option<StateHook>,
        time_limit: Option<(Duration, State)>,
    }

    let (exit_hooks, enter_actions, cancelled) = {
        let base = agent.so_base_mut();
        let target_leaf = base.states().resolve_leaf(target)?;
        let current = base.so_current_state();
        if current == target_leaf {
            return Ok(());
        }
        let lca = base.states().lca(current, target_leaf);

        let mut exit_path = Vec::new();
        for s in base.states().path_to_root(current) {
            if Some(s) == lca {
                break;
            }
            exit_path.push(s);
        }
        let mut enter_path = Vec::new();
        for s in base.states().path_to_root(target_leaf) {
            if Some(s) == lca {
                break;
            }
            enter_path.push(s);
        }
        enter_path.reverse();

        let exit_hooks: Vec<StateHook> = exit_path
            .iter()
            .filter_map(|s| base.states().on_exit_hook(*s))
            .collect();
        let enter_actions: Vec<EnterAction> = enter_path
            .iter()
            .map(|s| EnterAction {
                state: *s,
                hook: base.states().on_enter_hook(*s),
                time_limit: base.states().time_limit_of(*s),
            })
            .collect();
        let cancelled: Vec<crate::timer::TimerId> = exit_path
            .iter()
            .filter_map(|s| base.take_state_timer(*s))
            .collect();

        base.set_current_state(target_leaf);
        (exit_hooks, enter_actions, cancelled)
    };

    // Dropping the handles cancels the time limits of exited states.
    drop(cancelled);

    for hook in exit_hooks {
        hook(agent);
    }
    for action in enter_actions {
        if let Some(hook) = &action.hook {
            hook(agent);
        }
        if let Some((duration, _)) = action.time_limit {
            let base = agent.so_base_mut();
            let shared = Arc::clone(base.shared());
            let direct: MboxRef = Arc::clone(shared.direct_mbox()) as MboxRef;
            let timer = shared.env().schedule_timer_ref(
                &direct,
                MessageRef::message(TimeLimitElapsed {
                    state: action.state,
                }),
                duration,
                None,
            );
            base.put_state_timer(action.state, timer);
        }
    }
    Ok(())
}
