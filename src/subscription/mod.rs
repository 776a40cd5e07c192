//! Per-agent subscription storage with pluggable representations.

pub mod storage;

pub(crate) mod adaptive;
pub(crate) mod flat_set;
pub(crate) mod hash;
pub(crate) mod map;
pub(crate) mod vector;

pub use storage::{SubscriptionError, SubscriptionKey};

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use storage::SubscriptionStorage;

/// Default size threshold of the adaptive storage.
pub const DEFAULT_ADAPTIVE_THRESHOLD: usize = 8;

/// Selects the subscription-storage representation for an agent.
///
/// All representations have identical observable semantics; they differ
/// in the constant factors for different subscription counts.
///
/// | Factory  | Best for              | Structure                         |
/// |----------|-----------------------|-----------------------------------|
/// | Vector   | few subscriptions     | unsorted vector, linear search    |
/// | Map      | tens                  | ordered map                       |
/// | Hash     | hundreds and more     | hash map + ordered key set        |
/// | FlatSet  | few, sorted access    | sorted vector, binary search      |
/// | Adaptive | unknown               | vector migrating to hash and back |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageFactory {
    /// Unsorted vector with the given initial capacity.
    Vector {
        /// Pre-reserved capacity.
        initial_capacity: usize,
    },
    /// Ordered map.
    Map,
    /// Hash map plus ordered key set.
    Hash,
    /// Sorted vector with binary search.
    FlatSet,
    /// Starts small, migrates to hash past `threshold`, migrates back
    /// below half of it.
    #[default]
    Adaptive,
}

impl StorageFactory {
    pub(crate) fn create(&self) -> Box<dyn SubscriptionStorage> {
        match self {
            StorageFactory::Vector { initial_capacity } => {
                Box::new(vector::VectorStorage::new(*initial_capacity))
            }
            StorageFactory::Map => Box::new(map::MapStorage::new()),
            StorageFactory::Hash => Box::new(hash::HashStorage::new()),
            StorageFactory::FlatSet => Box::new(flat_set::FlatSetStorage::new()),
            StorageFactory::Adaptive => {
                Box::new(adaptive::AdaptiveStorage::new(DEFAULT_ADAPTIVE_THRESHOLD))
            }
        }
    }
}
