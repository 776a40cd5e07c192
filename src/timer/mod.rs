//! Timer subsystem: delayed and periodic message delivery.
//!
//! A dedicated thread sleeps until the earliest scheduled moment (or a
//! new earliest timer wakes it), then fires due entries through the
//! normal mbox delivery path, so limits, filters and envelopes all
//! apply. Periodic timers are rescheduled at `fire + period`; drift is
//! not corrected.

pub(crate) mod engine;

pub use engine::TimerEngineKind;

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use parking_lot::{Condvar, Mutex};

// Layer 3: Internal module imports
use crate::mbox::{AbstractMbox, MboxRef, DEFAULT_REDIRECTION_DEPTH};
use crate::message::MessageRef;
use engine::{TimerEngine, TimerEntry, TimerState};

/// Owner handle of a scheduled timer.
///
/// The handle is cheap to clone; dropping the **last** clone cancels
/// the timer. A fire racing with the drop may still produce one final
/// delivery, but no further fires occur afterwards.
#[derive(Clone, Default)]
pub struct TimerId {
    guard: Option<Arc<CancelOnDrop>>,
}

impl TimerId {
    fn cancellable(state: Arc<TimerState>) -> Self {
        Self {
            guard: Some(Arc::new(CancelOnDrop { state })),
        }
    }

    /// A handle that controls nothing (used where an API slot must be
    /// filled but the timer is anonymous).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cancel by explicit release. Equivalent to dropping the last
    /// clone.
    pub fn release(self) {}

    /// Does this handle still refer to an active (not cancelled)
    /// timer?
    pub fn is_active(&self) -> bool {
        self.guard
            .as_ref()
            .map(|g| g.state.is_active())
            .unwrap_or(false)
    }
}

struct CancelOnDrop {
    state: Arc<TimerState>,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.state.cancel();
    }
}

struct TimerServiceCore {
    engine: Mutex<Box<dyn TimerEngine>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

/// The timer thread plus its engine.
pub(crate) struct TimerService {
    core: Arc<TimerServiceCore>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub(crate) fn start(kind: TimerEngineKind) -> std::io::Result<Self> {
        let core = Arc::new(TimerServiceCore {
            engine: Mutex::new(kind.create()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let loop_core = Arc::clone(&core);
        let thread = std::thread::Builder::new()
            .name("timer".to_string())
            .spawn(move || timer_loop(&loop_core))?;
        Ok(Self {
            core,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Schedule a cancellable timer. `period == None` is single-shot.
    pub(crate) fn schedule(
        &self,
        mbox: &MboxRef,
        message: MessageRef,
        pause: Duration,
        period: Option<Duration>,
    ) -> TimerId {
        let state = Arc::new(TimerState::default());
        self.schedule_entry(TimerEntry {
            fire_at: Instant::now() + pause,
            period,
            mbox: Arc::clone(mbox),
            message,
            state: Arc::clone(&state),
        });
        TimerId::cancellable(state)
    }

    /// Schedule an anonymous single-shot timer that cannot be
    /// cancelled.
    pub(crate) fn single_shot_anonymous(
        &self,
        mbox: &MboxRef,
        message: MessageRef,
        pause: Duration,
    ) {
        self.schedule_entry(TimerEntry {
            fire_at: Instant::now() + pause,
            period: None,
            mbox: Arc::clone(mbox),
            message,
            state: Arc::new(TimerState::default()),
        });
    }

    fn schedule_entry(&self, entry: TimerEntry) {
        let mut engine = self.core.engine.lock();
        engine.schedule(entry);
        // The new entry may be the earliest one; wake the thread to
        // re-evaluate its sleep.
        self.core.wakeup.notify_one();
    }

    /// Number of entries currently held by the engine (stats source).
    pub(crate) fn timer_count(&self) -> usize {
        self.core.engine.lock().len()
    }

    pub(crate) fn stop(&self) {
        self.core.shutdown.store(true, Ordering::Release);
        {
            let _engine = self.core.engine.lock();
            self.core.wakeup.notify_all();
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_loop(core: &Arc<TimerServiceCore>) {
    let mut due: Vec<TimerEntry> = Vec::new();
    loop {
        {
            let mut engine = core.engine.lock();
            loop {
                if core.shutdown.load(Ordering::Acquire) {
                    return;
                }
                let now = Instant::now();
                engine.take_due(now, &mut due);
                if !due.is_empty() {
                    // Reschedule live periodic entries right away; the
                    // period applies from this fire, not the original
                    // schedule moment.
                    for entry in &due {
                        if let Some(period) = entry.period {
                            if entry.state.is_active() {
                                let mut next = entry.clone();
                                next.fire_at = now + period;
                                engine.schedule(next);
                            }
                        }
                    }
                    break;
                }
                match engine.next_deadline() {
                    Some(deadline) => {
                        core.wakeup.wait_until(&mut engine, deadline);
                    }
                    None => {
                        core.wakeup.wait(&mut engine);
                    }
                }
            }
        }

        // Deliveries happen outside the engine lock: a slow mbox never
        // delays scheduling of new timers.
        for entry in due.drain(..) {
            if !entry.state.is_active() {
                continue;
            }
            if let Err(error) = entry
                .mbox
                .deliver(entry.message.clone(), DEFAULT_REDIRECTION_DEPTH)
            {
                tracing::error!(
                    mbox = %entry.mbox.id(),
                    error = %error,
                    "timer delivery failed"
                );
            }
        }
    }
}
