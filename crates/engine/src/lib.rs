//! Parallel calculation engine: bounded worker slots, priority queueing,
//! result caching, per-task timeouts, and execution metrics.
//!
//! The engine schedules opaque calculation handlers registered per task
//! type. Callers submit work and await a future that resolves exactly once
//! with the terminal outcome. See [`dispatcher::Engine`] for the entry
//! point.

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;

pub use cache::ResultCache;
pub use dispatcher::{Engine, EngineStatus, Submission};
pub use error::{EngineError, HandlerFailure};
pub use metrics::{EngineMetrics, OutcomeKind};
pub use pool::{SlotId, SlotState, WorkerPool};
pub use queue::{CachePlan, PendingTask, TaskQueue};
pub use registry::{handler_fn, CachePolicy, CalcHandler, HandlerRegistry};

pub use calcgrid_core::{
    fingerprint, load_dotenv, new_task_id, CalcRequest, CalcResult, EngineConfig, TaskId, TaskType,
};
