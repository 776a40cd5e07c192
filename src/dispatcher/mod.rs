//! Dispatcher subsystem: demand queues, worker threads, binders and
//! the concrete scheduling policies.

pub mod active_group;
pub mod active_obj;
pub mod adv_thread_pool;
pub mod binder;
pub(crate) mod demand_queue;
pub mod event_queue;
pub mod one_thread;
pub mod prio;
pub mod queue_lock;
pub mod thread_pool;
pub mod work_thread;

pub use active_group::ActiveGroupDispatcher;
pub use active_obj::ActiveObjDispatcher;
pub use adv_thread_pool::{AdvThreadPoolDispatcher, AdvThreadPoolParams};
pub use binder::{DispBinder, DispBinderRef, DispatcherError};
pub use event_queue::{DemandKind, EventQueue, EventQueueHook, EventQueueRef, ExecutionDemand};
pub use one_thread::{DispatcherParams, OneThreadDispatcher};
pub use prio::{
    OnePerPrioDispatcher, QrrParams, QuotedRoundRobinDispatcher, StrictlyOrderedDispatcher,
};
pub use queue_lock::{QueueLockDefaults, QueueLockFactory};
pub use thread_pool::{BindParams, FifoKind, ThreadPoolDispatcher, ThreadPoolParams};
pub use work_thread::{ActivityStats, ActivityTracker};
