// Layer 1: Standard library imports
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::mbox::MboxRef;
use crate::message::MessageRef;

/// Cancellation flag shared between a [`TimerId`](super::TimerId) and
/// the engine's copy of the entry.
#[derive(Debug, Default)]
pub(crate) struct TimerState {
    cancelled: AtomicBool,
}

impl TimerState {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
    }
}

/// One scheduled delivery owned by the timer subsystem.
#[derive(Clone)]
pub(crate) struct TimerEntry {
    pub(crate) fire_at: Instant,
    pub(crate) period: Option<Duration>,
    pub(crate) mbox: MboxRef,
    pub(crate) message: MessageRef,
    pub(crate) state: Arc<TimerState>,
}

/// A timer data structure. All engines offer the same interface and
/// semantics; they differ in the complexity trade-off:
///
/// | Engine | Insert       | Fire        | Suited for                  |
/// |--------|--------------|-------------|-----------------------------|
/// | Heap   | O(log n)     | O(log n)    | general purpose (default)   |
/// | Wheel  | O(1) amort.  | O(1)/tick   | many similar short delays   |
/// | List   | O(n)         | O(1)        | few timers, long delays     |
///
/// Cancelled entries are dropped lazily when their moment comes.
pub(crate) trait TimerEngine: Send {
    /// Add one entry.
    fn schedule(&mut self, entry: TimerEntry);

    /// The moment the engine wants to be woken at, if it holds any
    /// entries.
    fn next_deadline(&self) -> Option<Instant>;

    /// Move every entry due at `now` into `out`.
    fn take_due(&mut self, now: Instant, out: &mut Vec<TimerEntry>);

    /// Number of held entries (including lazily cancelled ones).
    fn len(&self) -> usize;
}

/// Engine selection, one of the environment knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimerEngineKind {
    /// Binary heap ordered by deadline.
    #[default]
    Heap,
    /// Hashed timing wheel.
    Wheel {
        /// Number of wheel slots.
        wheel_size: usize,
        /// Width of one slot.
        granularity: Duration,
    },
    /// Deadline-sorted list.
    List,
}

impl TimerEngineKind {
    pub(crate) fn create(&self) -> Box<dyn TimerEngine> {
        match self {
            TimerEngineKind::Heap => Box::new(HeapEngine::default()),
            TimerEngineKind::Wheel {
                wheel_size,
                granularity,
            } => Box::new(WheelEngine::new(*wheel_size, *granularity)),
            TimerEngineKind::List => Box::new(ListEngine::default()),
        }
    }
}

// ---------------------------------------------------------------------
// Heap engine

struct HeapItem(TimerEntry);

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.0.fire_at == other.0.fire_at
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we need the earliest
        // deadline on top.
        other.0.fire_at.cmp(&self.0.fire_at)
    }
}

#[derive(Default)]
pub(crate) struct HeapEngine {
    heap: BinaryHeap<HeapItem>,
}

impl TimerEngine for HeapEngine {
    fn schedule(&mut self, entry: TimerEntry) {
        self.heap.push(HeapItem(entry));
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|item| item.0.fire_at)
    }

    fn take_due(&mut self, now: Instant, out: &mut Vec<TimerEntry>) {
        while let Some(item) = self.heap.peek() {
            if item.0.fire_at > now {
                break;
            }
            if let Some(item) = self.heap.pop() {
                out.push(item.0);
            }
        }
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

// ---------------------------------------------------------------------
// Wheel engine

struct WheelSlot {
    rounds: u32,
    entry: TimerEntry,
}

pub(crate) struct WheelEngine {
    buckets: Vec<Vec<WheelSlot>>,
    granularity: Duration,
    current: usize,
    next_tick_at: Instant,
    len: usize,
}

impl WheelEngine {
    pub(crate) fn new(wheel_size: usize, granularity: Duration) -> Self {
        let size = wheel_size.max(2);
        let granularity = granularity.max(Duration::from_millis(1));
        Self {
            buckets: (0..size).map(|_| Vec::new()).collect(),
            granularity,
            current: 0,
            next_tick_at: Instant::now() + granularity,
            len: 0,
        }
    }
}

impl TimerEngine for WheelEngine {
    fn schedule(&mut self, entry: TimerEntry) {
        let delta = entry
            .fire_at
            .saturating_duration_since(self.next_tick_at);
        let ticks = (delta.as_nanos() / self.granularity.as_nanos().max(1)) as usize;
        let slot = (self.current + ticks) % self.buckets.len();
        let rounds = (ticks / self.buckets.len()) as u32;
        self.buckets[slot].push(WheelSlot { rounds, entry });
        self.len += 1;
    }

    fn next_deadline(&self) -> Option<Instant> {
        (self.len > 0).then_some(self.next_tick_at)
    }

    fn take_due(&mut self, now: Instant, out: &mut Vec<TimerEntry>) {
        while self.next_tick_at <= now {
            let bucket = std::mem::take(&mut self.buckets[self.current]);
            for mut slot in bucket {
                if slot.rounds == 0 {
                    self.len -= 1;
                    out.push(slot.entry);
                } else {
                    slot.rounds -= 1;
                    self.buckets[self.current].push(slot);
                }
            }
            self.current = (self.current + 1) % self.buckets.len();
            self.next_tick_at += self.granularity;
        }
    }

    fn len(&self) -> usize {
        self.len
    }
}

// ---------------------------------------------------------------------
// Sorted-list engine

#[derive(Default)]
pub(crate) struct ListEngine {
    entries: VecDeque<TimerEntry>,
}

impl TimerEngine for ListEngine {
    fn schedule(&mut self, entry: TimerEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.fire_at <= entry.fire_at);
        self.entries.insert(pos, entry);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries.front().map(|e| e.fire_at)
    }

    fn take_due(&mut self, now: Instant, out: &mut Vec<TimerEntry>) {
        while let Some(front) = self.entries.front() {
            if front.fire_at > now {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                out.push(entry);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
