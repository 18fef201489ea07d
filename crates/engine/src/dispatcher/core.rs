use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::info;

use calcgrid_core::{EngineConfig, TaskId, TaskType};

use crate::cache::ResultCache;
use crate::metrics::EngineMetrics;
use crate::pool::{SlotId, WorkerPool};
use crate::queue::{CachePlan, TaskQueue, TaskSender};
use crate::registry::{CachePolicy, CalcHandler, HandlerRegistry};

/// The calculation engine. Bounds concurrent execution with a fixed slot
/// pool, queues excess work in priority order, deduplicates repeated
/// requests through a TTL cache, and enforces per-task deadlines.
///
/// Cheap to clone; all clones share one engine instance. Construct
/// explicitly with [`Engine::new`] and tear down with [`Engine::shutdown`].
#[derive(Clone)]
pub struct Engine {
    pub(super) inner: Arc<EngineInner>,
}

pub(super) struct EngineInner {
    pub(super) config: EngineConfig,
    pub(super) max_workers: usize,
    pub(super) registry: RwLock<HandlerRegistry>,
    /// Single coordination point for queue, pool, and running-task state.
    pub(super) state: Mutex<DispatchState>,
    pub(super) cache: Mutex<ResultCache>,
    pub(super) metrics: RwLock<EngineMetrics>,
    /// Monotonic submission counter, the queue's FIFO tie-break.
    pub(super) seq: AtomicU64,
    pub(super) shutting_down: AtomicBool,
    /// Pulsed on every completion so `shutdown` can wait for the drain.
    pub(super) drained: Notify,
}

pub(super) struct DispatchState {
    pub(super) pool: WorkerPool,
    pub(super) queue: TaskQueue,
    /// Completion senders for tasks currently bound to a slot. Removal
    /// from this map is what decides which terminal outcome wins.
    pub(super) running: HashMap<TaskId, RunningTask>,
}

pub(super) struct RunningTask {
    pub(super) slot: SlotId,
    pub(super) task_type: TaskType,
    pub(super) cache: Option<CachePlan>,
    pub(super) tx: TaskSender,
}

/// Point-in-time engine snapshot for monitoring and CLI display.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub max_workers: usize,
    pub available_workers: usize,
    pub active_calculations: usize,
    pub queued_tasks: usize,
    pub cache_size: usize,
    pub cache_hit_rate: f64,
}

impl Engine {
    /// Create a new engine with the given config. Worker slots are
    /// allocated here and live for the engine's lifetime.
    pub fn new(config: EngineConfig) -> Self {
        let max_workers = config.resolved_max_workers();
        info!(
            "Engine starting with {} workers, queue size {}",
            max_workers, config.queue_size
        );
        let inner = EngineInner {
            max_workers,
            state: Mutex::new(DispatchState {
                pool: WorkerPool::new(max_workers),
                queue: TaskQueue::new(config.queue_size),
                running: HashMap::new(),
            }),
            cache: Mutex::new(ResultCache::new(config.cache_max_entries)),
            registry: RwLock::new(HandlerRegistry::new()),
            metrics: RwLock::new(EngineMetrics::default()),
            seq: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            drained: Notify::new(),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Register a calculation handler with the default cache policy.
    pub fn register(&self, task_type: TaskType, handler: Arc<dyn CalcHandler>) {
        self.inner.registry.write().unwrap().register(task_type, handler);
    }

    /// Register a calculation handler with an explicit cache policy.
    pub fn register_with(
        &self,
        task_type: TaskType,
        handler: Arc<dyn CalcHandler>,
        policy: CachePolicy,
    ) {
        self.inner
            .registry
            .write()
            .unwrap()
            .register_with(task_type, handler, policy);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Point-in-time snapshot; no side effects.
    pub fn status(&self) -> EngineStatus {
        let state = self.inner.state.lock().unwrap();
        let cache = self.inner.cache.lock().unwrap();
        EngineStatus {
            max_workers: self.inner.max_workers,
            available_workers: state.pool.available(),
            active_calculations: state.pool.busy_count(),
            queued_tasks: state.queue.len(),
            cache_size: cache.len(),
            cache_hit_rate: cache.hit_rate(),
        }
    }

    /// Snapshot of accumulated execution metrics.
    pub fn metrics(&self) -> EngineMetrics {
        let mut snapshot = self.inner.metrics.read().unwrap().clone();
        let cache = self.inner.cache.lock().unwrap();
        snapshot.cache_hits = cache.hits();
        snapshot.cache_misses = cache.misses();
        snapshot
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop admission and wait until every queued and running task has
    /// reached its terminal outcome. Per-task deadlines bound the drain.
    pub async fn shutdown(&self) {
        info!("Engine shutdown requested, draining in-flight tasks");
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        loop {
            let notified = self.inner.drained.notified();
            {
                let state = self.inner.state.lock().unwrap();
                if state.queue.is_empty() && state.pool.is_idle() {
                    break;
                }
            }
            notified.await;
        }
        info!("Engine drained");
    }
}
