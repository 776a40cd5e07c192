// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Default busy-wait window of the combined queue lock.
pub const DEFAULT_BUSY_WAIT: Duration = Duration::from_millis(1);

/// Strategy of waiting on an empty demand queue.
///
/// The combined lock spins (yielding the CPU between probes) for a
/// short window before parking on a condition variable: under load a
/// new demand usually arrives within the window and the expensive
/// park/unpark round trip is avoided. The simple lock parks
/// immediately, trading latency for zero busy cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueLockFactory {
    /// Busy-wait for `busy_wait`, then fall back to a condvar.
    Combined {
        /// Length of the busy-waiting stage.
        busy_wait: Duration,
    },
    /// Pure mutex + condvar waiting.
    Simple,
}

impl Default for QueueLockFactory {
    fn default() -> Self {
        Self::Combined {
            busy_wait: DEFAULT_BUSY_WAIT,
        }
    }
}

impl QueueLockFactory {
    /// The busy-wait window, if any.
    pub(crate) fn busy_wait(&self) -> Option<Duration> {
        match self {
            Self::Combined { busy_wait } => Some(*busy_wait),
            Self::Simple => None,
        }
    }
}

/// Default lock factories for the queue families, installable through
/// the environment parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueLockDefaults {
    /// Factory for single-consumer demand queues.
    pub mpsc: QueueLockFactory,
    /// Factory for multi-consumer scheduling queues.
    pub mpmc: QueueLockFactory,
}
