//! Utility types: process-wide identifiers and agent priorities.

pub mod ids;

pub use ids::{AgentId, CoopId, IdSource, MboxId, Priority, PRIORITIES_COUNT};
