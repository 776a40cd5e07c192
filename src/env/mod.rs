//! The environment: owner of every runtime component and the
//! orchestration of startup and shutdown.

pub mod layer;
pub mod params;
pub mod stop_guard;

pub use layer::Layer;
pub use params::{EnvConfig, EnvParams, Infrastructure};
pub use stop_guard::StopGuard;

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

// Layer 3: Internal module imports
use crate::agent::ExceptionReaction;
use crate::coop::registry::CoopRegistry;
use crate::coop::{Coop, CoopError, CoopHandle, CoopRuntime, DeregReason};
use crate::dispatcher::binder::DispBinderRef;
use crate::dispatcher::event_queue::EventQueueRef;
use crate::dispatcher::one_thread::{DispatcherParams, OneThreadDispatcher};
use crate::mbox::local::LocalMbox;
use crate::mbox::named::{MboxNamespace, NamedMboxRegistry};
use crate::mbox::MboxRef;
use crate::mchain::{Mchain, MchainParams, MchainRef};
use crate::message::{Message, MessageRef, Signal};
use crate::msg_tracing::TraceSink;
use crate::stats::{Quantity, StatsController, StatsSource};
use crate::timer::{TimerId, TimerService};
use crate::util::{AgentId, CoopId, IdSource, MboxId};

/// Environment-level errors.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A stop guard cannot be installed once stop is in progress.
    #[error("stop guard setup failed: stop is already in progress")]
    StopGuardSetupFailedStopInProgress,

    /// A cooperation operation failed.
    #[error(transparent)]
    Coop(#[from] CoopError),

    /// A user-installed layer failed to start; layers started before
    /// it were stopped again in reverse order.
    #[error("layer {index} failed to start: {reason}")]
    LayerStartFailed {
        /// Installation index of the failed layer.
        index: usize,
        /// Stringified layer error.
        reason: String,
    },

    /// A startup stage could not be brought up; previously started
    /// stages were rolled back.
    #[error("failed to start environment stage `{stage}`")]
    StageStartFailed {
        /// Name of the failed stage.
        stage: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The user init callback returned an error; the environment was
    /// stopped and torn down.
    #[error("environment init failed: {reason}")]
    InitFailed {
        /// Stringified user error.
        reason: String,
    },
}

// ---------------------------------------------------------------------
// Coop finalizer thread

struct FinalizerCore {
    queue: Mutex<VecDeque<Arc<CoopRuntime>>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

/// Final coop deregistration runs on this dedicated thread so that
/// binder unbinding may join dispatcher worker threads without ever
/// joining the thread it runs on.
struct Finalizer {
    core: Arc<FinalizerCore>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Finalizer {
    fn start() -> std::io::Result<Self> {
        let core = Arc::new(FinalizerCore {
            queue: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let loop_core = Arc::clone(&core);
        let thread = std::thread::Builder::new()
            .name("coop-finalizer".to_string())
            .spawn(move || finalizer_loop(&loop_core))?;
        Ok(Self {
            core,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn enqueue(&self, coop: Arc<CoopRuntime>) {
        let mut queue = self.core.queue.lock();
        queue.push_back(coop);
        self.core.wakeup.notify_one();
    }

    fn stop(&self) {
        self.core.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.core.queue.lock();
            self.core.wakeup.notify_all();
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn finalizer_loop(core: &Arc<FinalizerCore>) {
    loop {
        let coop = {
            let mut queue = core.queue.lock();
            loop {
                if let Some(coop) = queue.pop_front() {
                    break coop;
                }
                if core.shutdown.load(Ordering::Acquire) {
                    return;
                }
                core.wakeup.wait(&mut queue);
            }
        };
        coop.final_deregistration();
    }
}

fn stop_layers(layers: &[Arc<dyn Layer>]) {
    for layer in layers.iter().rev() {
        layer.stop();
    }
}

/// Stops already-started layers if a later startup stage fails before
/// the environment takes ownership of them.
struct LayerRollback<'a> {
    layers: &'a [Arc<dyn Layer>],
    armed: bool,
}

impl<'a> LayerRollback<'a> {
    fn armed(layers: &'a [Arc<dyn Layer>]) -> Self {
        Self {
            layers,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for LayerRollback<'_> {
    fn drop(&mut self) {
        if self.armed {
            stop_layers(self.layers);
        }
    }
}

// ---------------------------------------------------------------------
// Stats sources over environment internals

struct CoopRegistrySource {
    env: Weak<EnvInner>,
}

impl StatsSource for CoopRegistrySource {
    fn distribute(&self, mbox: &MboxRef) {
        if let Some(env) = self.env.upgrade() {
            Quantity::publish(
                mbox,
                "coop_repository",
                "/coop.count",
                env.registry.coop_count() as u64,
            );
            Quantity::publish(
                mbox,
                "coop_repository",
                "/agent.count",
                env.registry.agent_count() as u64,
            );
        }
    }
}

struct TimerSource {
    env: Weak<EnvInner>,
}

impl StatsSource for TimerSource {
    fn distribute(&self, mbox: &MboxRef) {
        if let Some(env) = self.env.upgrade() {
            Quantity::publish(
                mbox,
                "timer_thread",
                "/timer.count",
                env.timer.timer_count() as u64,
            );
        }
    }
}

struct DefaultDispSource {
    env: Weak<EnvInner>,
}

impl StatsSource for DefaultDispSource {
    fn distribute(&self, mbox: &MboxRef) {
        if let Some(env) = self.env.upgrade() {
            Quantity::publish(
                mbox,
                "disp_one_thread_default",
                "/demands.count",
                env.default_disp.queue_len() as u64,
            );
            if let Some((working, waiting)) = env.default_disp.activity().snapshot() {
                Quantity::publish(
                    mbox,
                    "disp_one_thread_default",
                    "/thread.activity.working_ms",
                    working.total.as_millis() as u64,
                );
                Quantity::publish(
                    mbox,
                    "disp_one_thread_default",
                    "/thread.activity.waiting_ms",
                    waiting.total.as_millis() as u64,
                );
            }
        }
    }
}

// ---------------------------------------------------------------------
// Environment

pub(crate) struct EnvInner {
    config: EnvConfig,
    layers: Vec<Arc<dyn Layer>>,
    ids: IdSource,
    tracer: TraceSink,
    named: Arc<NamedMboxRegistry>,
    registry: CoopRegistry,
    timer: TimerService,
    default_disp: OneThreadDispatcher,
    finalizer: Finalizer,
    stats: Arc<StatsController>,
    stop_guards: stop_guard::StopGuardRepo,
    coop_listener: Option<Arc<dyn crate::coop::CoopListener>>,
    queue_hook: Option<Arc<dyn crate::dispatcher::event_queue::EventQueueHook>>,
    // Keeps the env-owned stats sources alive (the controller holds
    // weak references).
    stats_sources: Mutex<Vec<Arc<dyn StatsSource>>>,
    shutdown_started: AtomicBool,
    stop_completed: Mutex<bool>,
    stop_cv: Condvar,
}

/// Handle to a running environment. Cheap to clone; every agent and
/// every API caller works through it.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    /// Build an environment, run `init`, then block until the
    /// environment stops, and tear everything down.
    ///
    /// Startup stages (each failure rolls back the previous ones):
    /// user-installed layers, default dispatcher, timer thread, coop
    /// finalizer, stats controller, coop registry, user init. Shutdown
    /// mirrors the order, so layers stop last.
    pub fn launch(
        params: EnvParams,
        init: impl FnOnce(&Environment) -> Result<(), Box<dyn std::error::Error + Send + Sync>>,
    ) -> Result<(), EnvError> {
        let env = Self::build(params)?;
        let init_result = init(&env);
        match init_result {
            Ok(()) => {
                env.autoshutdown_if_idle();
                env.wait_for_stop();
                env.teardown();
                Ok(())
            }
            Err(error) => {
                env.stop();
                env.wait_for_stop();
                env.teardown();
                Err(EnvError::InitFailed {
                    reason: error.to_string(),
                })
            }
        }
    }

    fn build(params: EnvParams) -> Result<Self, EnvError> {
        let EnvParams {
            config,
            layers,
            tracer,
            coop_listener,
            event_queue_hook,
        } = params;
        let tracer = TraceSink::new(tracer);
        let ids = IdSource::new();

        // Stage 1: user-installed layers, before any service thread.
        for (index, layer) in layers.iter().enumerate() {
            if let Err(error) = layer.start() {
                stop_layers(&layers[..index]);
                return Err(EnvError::LayerStartFailed {
                    index,
                    reason: error.to_string(),
                });
            }
        }
        // Until the environment handle below takes ownership, a failed
        // later stage must roll the layers back.
        let mut layer_rollback = LayerRollback::armed(&layers);

        // Stage 2: the default dispatcher.
        let default_disp = OneThreadDispatcher::new(
            DispatcherParams::default()
                .named(config.default_disp_thread_name.clone())
                .with_lock_factory(config.queue_locks_defaults.mpsc)
                .with_activity_tracking(config.activity_tracking),
        )
        .map_err(|e| EnvError::StageStartFailed {
            stage: "default_dispatcher",
            source: match e {
                crate::dispatcher::DispatcherError::ThreadSpawnFailed(io) => io,
                other => std::io::Error::other(other.to_string()),
            },
        })?;

        // Stage 3: the timer engine.
        let timer = TimerService::start(config.timer_engine).map_err(|source| {
            EnvError::StageStartFailed {
                stage: "timer",
                source,
            }
        })?;

        let finalizer = Finalizer::start().map_err(|source| EnvError::StageStartFailed {
            stage: "coop_finalizer",
            source,
        })?;

        let stats_mbox: MboxRef = Arc::new(LocalMbox::new(ids.next_mbox_id(), tracer.clone()));
        let stats_thread = config.infrastructure != Infrastructure::SimpleNotMtSafe;
        let stats = StatsController::start(
            stats_mbox,
            config.stats_distribution_period,
            stats_thread,
        )
        .map_err(|source| EnvError::StageStartFailed {
            stage: "stats_controller",
            source,
        })?;

        layer_rollback.disarm();
        drop(layer_rollback);
        let inner = Arc::new(EnvInner {
            config,
            layers,
            ids,
            tracer,
            named: NamedMboxRegistry::new(),
            registry: CoopRegistry::new(),
            timer,
            default_disp,
            finalizer,
            stats,
            stop_guards: stop_guard::StopGuardRepo::default(),
            coop_listener,
            queue_hook: event_queue_hook,
            stats_sources: Mutex::new(Vec::new()),
            shutdown_started: AtomicBool::new(false),
            stop_completed: Mutex::new(false),
            stop_cv: Condvar::new(),
        });
        let env = Self { inner };
        env.install_stats_sources();
        Ok(env)
    }

    fn install_stats_sources(&self) {
        let weak = Arc::downgrade(&self.inner);
        let sources: Vec<Arc<dyn StatsSource>> = vec![
            Arc::new(CoopRegistrySource { env: weak.clone() }),
            Arc::new(TimerSource { env: weak.clone() }),
            Arc::new(DefaultDispSource { env: weak }),
        ];
        for source in &sources {
            self.inner.stats.add_source(source);
        }
        *self.inner.stats_sources.lock() = sources;
    }

    // -- mboxes -------------------------------------------------------

    /// Create an anonymous MPMC mbox.
    pub fn create_mbox(&self) -> MboxRef {
        Arc::new(LocalMbox::new(
            self.inner.ids.next_mbox_id(),
            self.inner.tracer.clone(),
        ))
    }

    /// Create or look up a named MPMC mbox in the default namespace.
    pub fn create_named_mbox(&self, name: impl Into<String>) -> MboxRef {
        self.introduce_named_mbox(MboxNamespace::plain(name), |env| env.create_mbox())
    }

    /// Create or look up a named mbox; when absent, the factory
    /// constructs the underlying mbox.
    pub fn introduce_named_mbox(
        &self,
        key: MboxNamespace,
        factory: impl FnOnce(&Environment) -> MboxRef,
    ) -> MboxRef {
        self.inner
            .named
            .lookup_or_create(key, || factory(self))
    }

    /// Number of currently registered mbox names.
    pub fn named_mbox_count(&self) -> usize {
        self.inner.named.len()
    }

    // -- mchains ------------------------------------------------------

    /// Create a message chain.
    pub fn create_mchain(&self, params: MchainParams) -> MchainRef {
        Mchain::new(self.inner.ids.next_mbox_id(), params)
    }

    // -- coops --------------------------------------------------------

    /// Start building a cooperation bound to the default dispatcher.
    pub fn make_coop(&self) -> Coop {
        Coop::new(self.clone(), self.default_binder())
    }

    /// Start building a cooperation with an explicit default binder.
    pub fn make_coop_with_binder(&self, binder: DispBinderRef) -> Coop {
        Coop::new(self.clone(), binder)
    }

    /// Binder of the environment's default (one-thread) dispatcher.
    pub fn default_binder(&self) -> DispBinderRef {
        self.inner.default_disp.binder()
    }

    /// Atomically register a cooperation.
    pub fn register_coop(&self, coop: Coop) -> Result<CoopHandle, CoopError> {
        self.inner.registry.register(self, coop)
    }

    /// Request deregistration of a cooperation. The first reason wins;
    /// repeated requests are no-ops.
    pub fn deregister_coop(
        &self,
        handle: &CoopHandle,
        reason: DeregReason,
    ) -> Result<(), CoopError> {
        self.inner.registry.deregister(handle, reason)
    }

    // -- timers -------------------------------------------------------

    /// Schedule a cancellable delayed (and optionally periodic)
    /// message. `period == Duration::ZERO` means single-shot.
    pub fn schedule_timer<M: Message>(
        &self,
        to: &MboxRef,
        pause: Duration,
        period: Duration,
        message: M,
    ) -> TimerId {
        self.schedule_timer_ref(
            to,
            MessageRef::message(message),
            pause,
            (!period.is_zero()).then_some(period),
        )
    }

    /// Schedule a cancellable delayed (and optionally periodic)
    /// signal.
    pub fn schedule_timer_signal<S: Signal>(
        &self,
        to: &MboxRef,
        pause: Duration,
        period: Duration,
    ) -> TimerId {
        self.schedule_timer_ref(
            to,
            MessageRef::signal::<S>(),
            pause,
            (!period.is_zero()).then_some(period),
        )
    }

    /// Fire-and-forget delayed message; cannot be cancelled.
    pub fn single_timer<M: Message>(&self, to: &MboxRef, pause: Duration, message: M) {
        self.inner
            .timer
            .single_shot_anonymous(to, MessageRef::message(message), pause);
    }

    /// Fire-and-forget delayed signal; cannot be cancelled.
    pub fn single_timer_signal<S: Signal>(&self, to: &MboxRef, pause: Duration) {
        self.inner
            .timer
            .single_shot_anonymous(to, MessageRef::signal::<S>(), pause);
    }

    pub(crate) fn schedule_timer_ref(
        &self,
        to: &MboxRef,
        message: MessageRef,
        pause: Duration,
        period: Option<Duration>,
    ) -> TimerId {
        self.inner.timer.schedule(to, message, pause, period)
    }

    // -- stats --------------------------------------------------------

    /// The run-time stats controller.
    pub fn stats_controller(&self) -> &Arc<StatsController> {
        &self.inner.stats
    }

    // -- stop guards and shutdown -------------------------------------

    /// Install a stop guard deferring shutdown.
    pub fn setup_stop_guard(&self, guard: Arc<dyn StopGuard>) -> Result<(), EnvError> {
        self.inner
            .stop_guards
            .setup(guard)
            .map_err(|_| EnvError::StopGuardSetupFailedStopInProgress)
    }

    /// Remove a previously installed stop guard. If a stop is pending
    /// and this was the last guard, shutdown proceeds.
    pub fn remove_stop_guard(&self, guard: &Arc<dyn StopGuard>) {
        if self.inner.stop_guards.remove(guard) {
            self.initiate_shutdown();
        }
    }

    /// Request environment shutdown. Idempotent and callable from any
    /// thread, including agent handlers. With stop guards installed the
    /// actual teardown waits for their removal.
    pub fn stop(&self) {
        let (guards, can_proceed) = self.inner.stop_guards.request_stop();
        for guard in &guards {
            guard.stop();
        }
        if can_proceed {
            self.initiate_shutdown();
        }
    }

    fn initiate_shutdown(&self) {
        if self.inner.shutdown_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let live = self.inner.registry.close_and_snapshot();
        if live.is_empty() {
            self.signal_stop_completed();
        } else {
            for coop in live {
                coop.initiate_deregistration(DeregReason::Shutdown);
            }
        }
    }

    fn autoshutdown_if_idle(&self) {
        if !self.inner.config.autoshutdown_disabled && self.inner.registry.is_empty() {
            self.stop();
        }
    }

    fn signal_stop_completed(&self) {
        let mut completed = self.inner.stop_completed.lock();
        *completed = true;
        self.inner.stop_cv.notify_all();
    }

    fn wait_for_stop(&self) {
        let mut completed = self.inner.stop_completed.lock();
        while !*completed {
            self.inner.stop_cv.wait(&mut completed);
        }
    }

    fn teardown(&self) {
        // Mirror of the startup order; layers went up first, so they
        // come down last.
        self.inner.stats.stop();
        self.inner.finalizer.stop();
        self.inner.timer.stop();
        self.inner.default_disp.stop();
        stop_layers(&self.inner.layers);
    }

    // -- crate-internal plumbing --------------------------------------

    pub(crate) fn next_agent_id(&self) -> AgentId {
        self.inner.ids.next_agent_id()
    }

    pub(crate) fn next_mbox_id(&self) -> MboxId {
        self.inner.ids.next_mbox_id()
    }

    pub(crate) fn next_coop_id(&self) -> CoopId {
        self.inner.ids.next_coop_id()
    }

    pub(crate) fn tracer_sink(&self) -> TraceSink {
        self.inner.tracer.clone()
    }

    pub(crate) fn default_exception_reaction(&self) -> ExceptionReaction {
        match self.inner.config.exception_reaction {
            // `Inherit` at the top of the chain falls back to abort.
            ExceptionReaction::Inherit => ExceptionReaction::Abort,
            concrete => concrete,
        }
    }

    pub(crate) fn coop_registry(&self) -> &CoopRegistry {
        &self.inner.registry
    }

    pub(crate) fn enqueue_final_dereg(&self, coop: Arc<CoopRuntime>) {
        self.inner.finalizer.enqueue(coop);
    }

    pub(crate) fn on_coop_removed(&self) {
        if !self.inner.registry.is_empty() {
            return;
        }
        if self.inner.shutdown_started.load(Ordering::Acquire) {
            self.signal_stop_completed();
        } else if !self.inner.config.autoshutdown_disabled {
            self.stop();
        }
    }

    pub(crate) fn wrap_event_queue(&self, agent: AgentId, queue: EventQueueRef) -> EventQueueRef {
        match &self.inner.queue_hook {
            Some(hook) => hook.on_bind(agent, queue),
            None => queue,
        }
    }

    pub(crate) fn notify_queue_unbind(&self, agent: AgentId) {
        if let Some(hook) = &self.inner.queue_hook {
            hook.on_unbind(agent);
        }
    }

    pub(crate) fn notify_coop_registered(&self, handle: &CoopHandle) {
        if let Some(listener) = &self.inner.coop_listener {
            listener.on_registered(handle);
        }
    }

    pub(crate) fn notify_coop_deregistered(&self, handle: &CoopHandle, reason: DeregReason) {
        if let Some(listener) = &self.inner.coop_listener {
            listener.on_deregistered(handle, reason);
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("coops", &self.inner.registry.coop_count())
            .field("named_mboxes", &self.inner.named.len())
            .finish_non_exhaustive()
    }
}
