// Layer 1: Standard library imports
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

// Layer 2: Third-party crate imports
// (none for this module)

// Layer 3: Internal module imports
use super::base::AgentBase;
use super::handler::{EventHandler, ExclusiveFn, HandlerResult, SharedFn};
use super::runtime::change_agent_state;
use super::state::{State, StateError};
use super::traits::Agent;
use crate::mbox::MboxRef;
use crate::message::{Message, MessageRef, MsgTypeId, Signal};
use crate::subscription::storage::SubscriptionError;

fn agent_type_mismatch() -> crate::agent::handler::HandlerError {
    "agent type mismatch in subscribed handler".into()
}

fn payload_type_mismatch() -> crate::agent::handler::HandlerError {
    "payload type mismatch in subscribed handler".into()
}

/// Fluent subscription surface: `agent.so_subscribe(&mbox)
/// .in_state(s).event(...)`.
///
/// Without `in_state` the subscription goes to the agent's default
/// state. Every terminal method returns the builder again, so several
/// handlers can be chained with `?`.
pub struct SubscriptionBuilder<'a, A: Agent> {
    base: &'a mut AgentBase,
    mbox: MboxRef,
    states: Vec<State>,
    _agent: PhantomData<fn(A)>,
}

impl<'a, A: Agent> SubscriptionBuilder<'a, A> {
    pub(crate) fn new(base: &'a mut AgentBase, mbox: &MboxRef) -> Self {
        Self {
            base,
            mbox: Arc::clone(mbox),
            states: Vec::new(),
            _agent: PhantomData,
        }
    }

    /// Add a state the following handlers are subscribed in. May be
    /// called several times to cover several states.
    pub fn in_state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    fn subscribe_erased(
        self,
        msg_type: MsgTypeId,
        handler: EventHandler,
    ) -> Result<Self, SubscriptionError> {
        let states = if self.states.is_empty() {
            vec![self.base.so_default_state()]
        } else {
            self.states.clone()
        };
        self.base
            .do_subscribe(&self.mbox, msg_type, &states, handler)?;
        Ok(self)
    }

    /// Subscribe a handler for messages of type `M`.
    pub fn event<M: Message>(
        self,
        handler: impl Fn(&mut A, &M) + Send + Sync + 'static,
    ) -> Result<Self, SubscriptionError> {
        self.event_try::<M>(move |agent, msg| {
            handler(agent, msg);
            Ok(())
        })
    }

    /// Subscribe a fallible handler for messages of type `M`. An error
    /// return is routed through the agent's exception reaction.
    pub fn event_try<M: Message>(
        self,
        handler: impl Fn(&mut A, &M) -> HandlerResult + Send + Sync + 'static,
    ) -> Result<Self, SubscriptionError> {
        let erased: ExclusiveFn = Arc::new(move |agent: &mut dyn Agent, msg: &MessageRef| {
            let any: &mut dyn Any = agent;
            let typed = any.downcast_mut::<A>().ok_or_else(agent_type_mismatch)?;
            let payload = msg.downcast_ref::<M>().ok_or_else(payload_type_mismatch)?;
            handler(typed, payload)
        });
        self.subscribe_erased(
            MsgTypeId::immutable::<M>(),
            EventHandler::exclusive(erased),
        )
    }

    /// Subscribe a handler for the mutable form of `M`; the handler
    /// gets exclusive access to the payload.
    pub fn event_mutable<M: Message>(
        self,
        handler: impl Fn(&mut A, &mut M) + Send + Sync + 'static,
    ) -> Result<Self, SubscriptionError> {
        let erased: ExclusiveFn = Arc::new(move |agent: &mut dyn Agent, msg: &MessageRef| {
            let any: &mut dyn Any = agent;
            let typed = any.downcast_mut::<A>().ok_or_else(agent_type_mismatch)?;
            msg.with_mutable::<M, _>(|payload| handler(typed, payload))
                .ok_or_else(payload_type_mismatch)
        });
        self.subscribe_erased(MsgTypeId::mutable::<M>(), EventHandler::exclusive(erased))
    }

    /// Subscribe a handler for a signal.
    pub fn signal<S: Signal>(
        self,
        handler: impl Fn(&mut A) + Send + Sync + 'static,
    ) -> Result<Self, SubscriptionError> {
        self.signal_try::<S>(move |agent| {
            handler(agent);
            Ok(())
        })
    }

    /// Subscribe a fallible handler for a signal.
    pub fn signal_try<S: Signal>(
        self,
        handler: impl Fn(&mut A) -> HandlerResult + Send + Sync + 'static,
    ) -> Result<Self, SubscriptionError> {
        let erased: ExclusiveFn = Arc::new(move |agent: &mut dyn Agent, _msg: &MessageRef| {
            let any: &mut dyn Any = agent;
            let typed = any.downcast_mut::<A>().ok_or_else(agent_type_mismatch)?;
            handler(typed)
        });
        self.subscribe_erased(
            MsgTypeId::immutable::<S>(),
            EventHandler::exclusive(erased),
        )
    }

    /// Subscribe a thread-safe handler for messages of type `M`: it
    /// receives `&A` and may run concurrently with other thread-safe
    /// handlers of the same agent on dispatchers that support it.
    pub fn event_thread_safe<M: Message>(
        self,
        handler: impl Fn(&A, &M) + Send + Sync + 'static,
    ) -> Result<Self, SubscriptionError> {
        let erased: SharedFn = Arc::new(move |agent: &dyn Agent, msg: &MessageRef| {
            let any: &dyn Any = agent;
            let typed = any.downcast_ref::<A>().ok_or_else(agent_type_mismatch)?;
            let payload = msg.downcast_ref::<M>().ok_or_else(payload_type_mismatch)?;
            handler(typed, payload);
            Ok(())
        });
        self.subscribe_erased(
            MsgTypeId::immutable::<M>(),
            EventHandler::thread_safe(erased),
        )
    }

    /// Subscribe a thread-safe handler for a signal.
    pub fn signal_thread_safe<S: Signal>(
        self,
        handler: impl Fn(&A) + Send + Sync + 'static,
    ) -> Result<Self, SubscriptionError> {
        let erased: SharedFn = Arc::new(move |agent: &dyn Agent, _msg: &MessageRef| {
            let any: &dyn Any = agent;
            let typed = any.downcast_ref::<A>().ok_or_else(agent_type_mismatch)?;
            handler(typed);
            Ok(())
        });
        self.subscribe_erased(
            MsgTypeId::immutable::<S>(),
            EventHandler::thread_safe(erased),
        )
    }

    /// Subscribe a handler that receives the raw message reference of
    /// `M` deliveries. Useful for storing and re-sending messages.
    pub fn event_raw<M: Message>(
        self,
        handler: impl Fn(&mut A, &MessageRef) -> HandlerResult + Send + Sync + 'static,
    ) -> Result<Self, SubscriptionError> {
        let erased: ExclusiveFn = Arc::new(move |agent: &mut dyn Agent, msg: &MessageRef| {
            let any: &mut dyn Any = agent;
            let typed = any.downcast_mut::<A>().ok_or_else(agent_type_mismatch)?;
            handler(typed, msg)
        });
        self.subscribe_erased(
            MsgTypeId::immutable::<M>(),
            EventHandler::exclusive(erased),
        )
    }
}

/// Blanket extension with the subscription and state-change surface.
/// Everything here is sugar over [`AgentBase`].
pub trait AgentExt: Agent + Sized {
    /// Start building a subscription on `mbox`.
    fn so_subscribe(&mut self, mbox: &MboxRef) -> SubscriptionBuilder<'_, Self> {
        SubscriptionBuilder::new(self.so_base_mut(), mbox)
    }

    /// Start building a subscription on the agent's direct mbox.
    fn so_subscribe_self(&mut self) -> SubscriptionBuilder<'_, Self> {
        let mbox = self.so_base().so_direct_mbox();
        SubscriptionBuilder::new(self.so_base_mut(), &mbox)
    }

    /// Move the agent to `target`, running exit and enter hooks along
    /// the path between the current leaf and the target.
    fn so_change_state(&mut self, target: State) -> Result<(), StateError> {
        change_agent_state(self, target)
    }
}

impl<A: Agent> AgentExt for A {}
