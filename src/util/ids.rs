// Layer 1: Standard library imports
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Unique identifier of a message box.
///
/// Ids are allocated by the environment from a single monotonically
/// increasing 64-bit counter and stay unique for the whole lifetime of
/// that environment. Subscription storages use the id as a stable key,
/// so an id is never reused even after its mbox is destroyed.
///
/// # Example
/// ```rust
/// use agentry::util::IdSource;
///
/// let ids = IdSource::new();
/// let a = ids.next_mbox_id();
/// let b = ids.next_mbox_id();
/// assert!(a < b); // Strictly monotonic
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct MboxId(u64);

impl MboxId {
    /// Create an id from its raw numeric value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for MboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mbox:{}", self.0)
    }
}

/// Unique identifier of an agent.
///
/// Allocated from the same monotonic counter as [`MboxId`]; also used as
/// the sink id when an agent subscribes to an mbox.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct AgentId(u64);

impl AgentId {
    /// Create an id from its raw numeric value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent:{}", self.0)
    }
}

/// Unique identifier of a cooperation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CoopId(u64);

impl CoopId {
    /// Create an id from its raw numeric value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for CoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coop:{}", self.0)
    }
}

/// Process-wide source of monotonically increasing ids.
///
/// One instance is owned by the environment; every id family (mboxes,
/// agents, coops) draws from the same counter, so ids are unique across
/// families too.
#[derive(Debug, Default)]
pub struct IdSource {
    next: AtomicU64,
}

impl IdSource {
    /// Create a source starting from 1. Id 0 is reserved as "never
    /// allocated" for diagnostics.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    fn next_raw(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate the next mbox id.
    pub fn next_mbox_id(&self) -> MboxId {
        MboxId(self.next_raw())
    }

    /// Allocate the next agent id.
    pub fn next_agent_id(&self) -> AgentId {
        AgentId(self.next_raw())
    }

    /// Allocate the next coop id.
    pub fn next_coop_id(&self) -> CoopId {
        CoopId(self.next_raw())
    }
}

/// Agent priority used by priority-aware dispatchers.
///
/// `P0` is the lowest and the default, `P7` the highest. Dispatchers
/// that do not look at priorities ignore the value entirely.
///
/// # Example
/// ```rust
/// use agentry::util::Priority;
///
/// assert!(Priority::P7 > Priority::P0);
/// assert_eq!(Priority::default(), Priority::P0);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    /// Lowest priority (default).
    #[default]
    P0,
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
    /// Highest priority.
    P7,
}

/// Total number of priority classes.
pub const PRIORITIES_COUNT: usize = 8;

impl Priority {
    /// Index of the priority in `0..PRIORITIES_COUNT`.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// All priorities from lowest to highest.
    pub fn all() -> [Priority; PRIORITIES_COUNT] {
        [
            Priority::P0,
            Priority::P1,
            Priority::P2,
            Priority::P3,
            Priority::P4,
            Priority::P5,
            Priority::P6,
            Priority::P7,
        ]
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let ids = IdSource::new();
        let a = ids.next_mbox_id();
        let b = ids.next_mbox_id();
        let c = ids.next_mbox_id();

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_id_families_share_the_counter() {
        let ids = IdSource::new();
        let m = ids.next_mbox_id();
        let a = ids.next_agent_id();
        let c = ids.next_coop_id();

        assert_ne!(m.raw(), a.raw());
        assert_ne!(a.raw(), c.raw());
    }

    #[test]
    fn test_zero_is_never_allocated() {
        let ids = IdSource::new();
        assert_ne!(ids.next_mbox_id().raw(), 0);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", MboxId::from_raw(7)), "mbox:7");
        assert_eq!(format!("{}", AgentId::from_raw(8)), "agent:8");
        assert_eq!(format!("{}", CoopId::from_raw(9)), "coop:9");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::P7 > Priority::P6);
        assert!(Priority::P1 > Priority::P0);
        assert_eq!(Priority::P3.index(), 3);
    }

    #[test]
    fn test_priority_all_is_sorted() {
        let all = Priority::all();
        assert_eq!(all.len(), PRIORITIES_COUNT);
        for w in all.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(format!("{}", Priority::P0), "p0");
        assert_eq!(format!("{}", Priority::P7), "p7");
    }
}
