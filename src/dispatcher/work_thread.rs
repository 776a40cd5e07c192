// Layer 1: Standard library imports
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use parking_lot::Mutex;
use serde::Serialize;

// Layer 3: Internal module imports
use super::binder::DispatcherError;
use super::demand_queue::{MpscDemandQueue, PopResult};

/// Accumulated activity of one worker thread.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ActivityStats {
    /// Number of measured intervals.
    pub count: u64,
    /// Total time across the intervals.
    pub total: Duration,
}

impl ActivityStats {
    fn record(&mut self, interval: Duration) {
        self.count += 1;
        self.total += interval;
    }
}

/// Working/waiting time tracker, one per worker thread. Disabled
/// tracking costs two branch checks per demand batch.
pub struct ActivityTracker {
    enabled: bool,
    stats: Mutex<(ActivityStats, ActivityStats)>,
}

impl ActivityTracker {
    pub(crate) fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled,
            stats: Mutex::new((ActivityStats::default(), ActivityStats::default())),
        })
    }

    pub(crate) fn record_working(&self, interval: Duration) {
        if self.enabled {
            self.stats.lock().0.record(interval);
        }
    }

    pub(crate) fn record_waiting(&self, interval: Duration) {
        if self.enabled {
            self.stats.lock().1.record(interval);
        }
    }

    /// `(working, waiting)` stats, or `None` when tracking is off.
    pub fn snapshot(&self) -> Option<(ActivityStats, ActivityStats)> {
        self.enabled.then(|| *self.stats.lock())
    }
}

const DEMAND_BATCH: usize = 16;

/// One worker thread looping over an [`MpscDemandQueue`]. The loop is
/// shared by every single-consumer dispatcher variant.
pub(crate) struct WorkThread {
    handle: Option<JoinHandle<()>>,
    queue: Arc<MpscDemandQueue>,
}

impl WorkThread {
    pub(crate) fn start(
        name: String,
        queue: Arc<MpscDemandQueue>,
        activity: Arc<ActivityTracker>,
    ) -> Result<Self, DispatcherError> {
        let loop_queue = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || demand_loop(&loop_queue, &activity))?;
        Ok(Self {
            handle: Some(handle),
            queue,
        })
    }

    pub(crate) fn stop_and_join(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.queue.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkThread {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn demand_loop(queue: &Arc<MpscDemandQueue>, activity: &Arc<ActivityTracker>) {
    let mut batch = Vec::with_capacity(DEMAND_BATCH);
    loop {
        let wait_started = Instant::now();
        match queue.pop_batch(DEMAND_BATCH, &mut batch) {
            PopResult::Shutdown => return,
            PopResult::Demands => {
                activity.record_waiting(wait_started.elapsed());
                for demand in batch.drain(..) {
                    let work_started = Instant::now();
                    demand.execute();
                    activity.record_working(work_started.elapsed());
                }
            }
        }
    }
}
