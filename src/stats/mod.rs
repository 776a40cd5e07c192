//! Run-time statistics distribution.
//!
//! A [`StatsController`] owns a dedicated thread that, while turned on,
//! periodically asks every registered [`StatsSource`] to publish
//! [`Quantity`] messages to the stats mbox. Interested agents simply
//! subscribe to that mbox.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

// Layer 3: Internal module imports
use crate::mbox::{send, MboxRef};

/// Default distribution period.
pub const DEFAULT_DISTRIBUTION_PERIOD: Duration = Duration::from_secs(2);

/// One published metric: a `prefix/suffix` name plus the value, stamped
/// with the distribution moment.
#[derive(Debug, Clone, Serialize)]
pub struct Quantity {
    /// Data-source group, e.g. `"coop_repository"`.
    pub prefix: String,
    /// Metric name within the group, e.g. `"/coop.count"`.
    pub suffix: &'static str,
    /// Current value.
    pub value: u64,
    /// When the value was sampled.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub stamped_at: DateTime<Utc>,
}

impl Quantity {
    /// Build and send one quantity to the stats mbox.
    pub fn publish(mbox: &MboxRef, prefix: impl Into<String>, suffix: &'static str, value: u64) {
        let quantity = Quantity {
            prefix: prefix.into(),
            suffix,
            value,
            stamped_at: Utc::now(),
        };
        if let Err(error) = send(mbox, quantity) {
            tracing::warn!(error = %error, "stats quantity delivery failed");
        }
    }
}

/// A data source polled on every distribution cycle.
pub trait StatsSource: Send + Sync {
    /// Publish the source's quantities to `mbox`.
    fn distribute(&self, mbox: &MboxRef);
}

struct ControllerState {
    enabled: bool,
    period: Duration,
}

/// Turns run-time stats distribution on and off.
pub struct StatsController {
    mbox: MboxRef,
    state: Mutex<ControllerState>,
    wakeup: Condvar,
    sources: Mutex<Vec<Weak<dyn StatsSource>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl StatsController {
    pub(crate) fn start(mbox: MboxRef, period: Duration, with_thread: bool) -> std::io::Result<Arc<Self>> {
        let controller = Arc::new(Self {
            mbox,
            state: Mutex::new(ControllerState {
                enabled: false,
                period,
            }),
            wakeup: Condvar::new(),
            sources: Mutex::new(Vec::new()),
            thread: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });
        if with_thread {
            let loop_controller = Arc::clone(&controller);
            let handle = std::thread::Builder::new()
                .name("stats".to_string())
                .spawn(move || distribution_loop(&loop_controller))?;
            *controller.thread.lock() = Some(handle);
        }
        Ok(controller)
    }

    /// The mbox quantities are distributed to.
    pub fn mbox(&self) -> MboxRef {
        Arc::clone(&self.mbox)
    }

    /// Start periodic distribution.
    pub fn turn_on(&self) {
        self.state.lock().enabled = true;
        self.wakeup.notify_all();
    }

    /// Stop periodic distribution.
    pub fn turn_off(&self) {
        self.state.lock().enabled = false;
        self.wakeup.notify_all();
    }

    /// Is distribution currently on?
    pub fn is_on(&self) -> bool {
        self.state.lock().enabled
    }

    /// Change the distribution period.
    pub fn set_distribution_period(&self, period: Duration) {
        self.state.lock().period = period.max(Duration::from_millis(10));
        self.wakeup.notify_all();
    }

    /// Register a data source. The controller keeps a weak reference;
    /// the source disappears from the cycle when dropped by its owner.
    pub fn add_source(&self, source: &Arc<dyn StatsSource>) {
        self.sources.lock().push(Arc::downgrade(source));
    }

    fn distribute_once(&self) {
        let sources: Vec<Arc<dyn StatsSource>> = {
            let mut sources = self.sources.lock();
            sources.retain(|weak| weak.strong_count() > 0);
            sources.iter().filter_map(Weak::upgrade).collect()
        };
        for source in sources {
            source.distribute(&self.mbox);
        }
    }

    pub(crate) fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wakeup.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn distribution_loop(controller: &Arc<StatsController>) {
    loop {
        {
            let mut state = controller.state.lock();
            loop {
                if controller.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if state.enabled {
                    let period = state.period;
                    controller.wakeup.wait_for(&mut state, period);
                    break;
                }
                controller.wakeup.wait(&mut state);
            }
            if !state.enabled {
                continue;
            }
        }
        if controller.shutdown.load(Ordering::Acquire) {
            return;
        }
        controller.distribute_once();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mbox::local::LocalMbox;
    use crate::msg_tracing::TraceSink;
    use crate::util::MboxId;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl StatsSource for CountingSource {
        fn distribute(&self, _mbox: &MboxRef) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stats_mbox() -> MboxRef {
        Arc::new(LocalMbox::new(MboxId::from_raw(1), TraceSink::default()))
    }

    #[test]
    fn test_distribution_happens_only_when_on() {
        let controller =
            StatsController::start(stats_mbox(), Duration::from_millis(20), true).unwrap();
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let as_source: Arc<dyn StatsSource> = source.clone();
        controller.add_source(&as_source);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        controller.turn_on();
        std::thread::sleep(Duration::from_millis(150));
        assert!(source.calls.load(Ordering::SeqCst) >= 2);

        controller.turn_off();
        std::thread::sleep(Duration::from_millis(50));
        let after_off = source.calls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        assert!(source.calls.load(Ordering::SeqCst) <= after_off + 1);

        controller.stop();
    }

    #[test]
    fn test_dropped_source_leaves_the_cycle() {
        let controller =
            StatsController::start(stats_mbox(), Duration::from_millis(10), true).unwrap();
        {
            let source = Arc::new(CountingSource {
                calls: AtomicUsize::new(0),
            });
            let as_source: Arc<dyn StatsSource> = source;
            controller.add_source(&as_source);
        }
        controller.turn_on();
        std::thread::sleep(Duration::from_millis(50));
        controller.stop();
    }
}
