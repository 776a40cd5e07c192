// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use super::layer::Layer;
use crate::agent::ExceptionReaction;
use crate::coop::CoopListener;
use crate::dispatcher::event_queue::EventQueueHook;
use crate::dispatcher::queue_lock::QueueLockDefaults;
use crate::msg_tracing::MsgTracer;
use crate::stats::DEFAULT_DISTRIBUTION_PERIOD;
use crate::timer::TimerEngineKind;

/// Threading model of the environment internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Infrastructure {
    /// Fully multi-threaded: the general-purpose default.
    #[default]
    DefaultMt,
    /// Thread-economical variant that is still safe to drive from
    /// several threads.
    SimpleMtSafe,
    /// Thread-economical variant for strictly single-threaded hosting
    /// code; skips the stats distribution thread.
    SimpleNotMtSafe,
}

/// Exception reaction used by agents and coops that resolve to
/// `Inherit` all the way up. Terminating on unhandled errors is the
/// safe default.
const fn default_exception_reaction() -> ExceptionReaction {
    ExceptionReaction::Abort
}

/// Plain-data configuration of an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Threading model.
    pub infrastructure: Infrastructure,
    /// Timer engine selection.
    pub timer_engine: TimerEngineKind,
    /// Worker-thread activity tracking for the default dispatcher.
    pub activity_tracking: bool,
    /// Reaction for handler errors that resolve to `Inherit`.
    #[serde(skip, default = "default_exception_reaction")]
    pub exception_reaction: ExceptionReaction,
    /// Do not stop the environment when the last coop is deregistered.
    pub autoshutdown_disabled: bool,
    /// Default queue-lock factories for the dispatcher families.
    pub queue_locks_defaults: QueueLockDefaults,
    /// Distribution period of the run-time stats controller.
    pub stats_distribution_period: Duration,
    /// Name of the default dispatcher's worker thread.
    pub default_disp_thread_name: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            infrastructure: Infrastructure::default(),
            timer_engine: TimerEngineKind::default(),
            activity_tracking: false,
            exception_reaction: default_exception_reaction(),
            autoshutdown_disabled: false,
            queue_locks_defaults: QueueLockDefaults::default(),
            stats_distribution_period: DEFAULT_DISTRIBUTION_PERIOD,
            default_disp_thread_name: "default-disp".to_string(),
        }
    }
}

/// Full environment parameters: the plain configuration plus the
/// pluggable hooks.
#[derive(Default)]
pub struct EnvParams {
    /// Plain-data knobs.
    pub config: EnvConfig,
    pub(crate) layers: Vec<Arc<dyn Layer>>,
    pub(crate) tracer: Option<Arc<dyn MsgTracer>>,
    pub(crate) coop_listener: Option<Arc<dyn CoopListener>>,
    pub(crate) event_queue_hook: Option<Arc<dyn EventQueueHook>>,
}

impl EnvParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a background layer. Layers start (in installation
    /// order) before every other environment stage and stop last.
    pub fn add_layer(mut self, layer: Arc<dyn Layer>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Select the threading model.
    pub fn infrastructure(mut self, infrastructure: Infrastructure) -> Self {
        self.config.infrastructure = infrastructure;
        self
    }

    /// Select the timer engine.
    pub fn timer_engine(mut self, kind: TimerEngineKind) -> Self {
        self.config.timer_engine = kind;
        self
    }

    /// Track worker activity on the default dispatcher.
    pub fn work_thread_activity_tracking(mut self, enabled: bool) -> Self {
        self.config.activity_tracking = enabled;
        self
    }

    /// Environment-wide default exception reaction.
    pub fn exception_reaction(mut self, reaction: ExceptionReaction) -> Self {
        self.config.exception_reaction = reaction;
        self
    }

    /// Keep the environment running after the last coop leaves.
    pub fn disable_autoshutdown(mut self) -> Self {
        self.config.autoshutdown_disabled = true;
        self
    }

    /// Default queue-lock factories.
    pub fn queue_locks_defaults(mut self, defaults: QueueLockDefaults) -> Self {
        self.config.queue_locks_defaults = defaults;
        self
    }

    /// Distribution period of the stats controller.
    pub fn stats_distribution_period(mut self, period: Duration) -> Self {
        self.config.stats_distribution_period = period;
        self
    }

    /// Install a message-delivery tracer.
    pub fn message_delivery_tracer(mut self, tracer: Arc<dyn MsgTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Install a coop lifecycle listener.
    pub fn coop_listener(mut self, listener: Arc<dyn CoopListener>) -> Self {
        self.coop_listener = Some(listener);
        self
    }

    /// Install an event-queue hook wrapping every queue handed to an
    /// agent at bind.
    pub fn event_queue_hook(mut self, hook: Arc<dyn EventQueueHook>) -> Self {
        self.event_queue_hook = Some(hook);
        self
    }
}
