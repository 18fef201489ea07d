//! Pluggable calculation handlers, keyed by task type.
//!
//! Handlers are registered at engine initialization by external calculation
//! modules (valuation, risk analysis, etc.). The engine treats a handler's
//! output as an opaque payload for caching and metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use calcgrid_core::TaskType;

use crate::error::HandlerFailure;

/// A registered computation for one task type.
///
/// Implementations should be pure enough that caching a result under the
/// input fingerprint is sound. Blocking CPU work belongs behind
/// `tokio::task::spawn_blocking` inside the handler.
#[async_trait]
pub trait CalcHandler: Send + Sync {
    async fn run(&self, inputs: &Value) -> Result<Value, HandlerFailure>;
}

/// Caching behavior for one task type.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Whether successful results are cached at all.
    pub cacheable: bool,
    /// Per-type TTL override; engine-wide `cache_ttl` when `None`.
    pub ttl: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            cacheable: true,
            ttl: None,
        }
    }
}

struct Registration {
    handler: Arc<dyn CalcHandler>,
    policy: CachePolicy,
}

/// Maps task types to their registered handlers and cache policies.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler with the default cache policy.
    pub fn register(&mut self, task_type: TaskType, handler: Arc<dyn CalcHandler>) {
        self.register_with(task_type, handler, CachePolicy::default());
    }

    /// Register a handler with an explicit cache policy.
    ///
    /// Re-registering a type replaces the previous handler.
    pub fn register_with(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn CalcHandler>,
        policy: CachePolicy,
    ) {
        info!(
            "Registered handler: {} (cacheable: {})",
            task_type, policy.cacheable
        );
        self.handlers
            .insert(task_type, Registration { handler, policy });
    }

    /// Look up the handler and cache policy for a task type.
    pub fn lookup(&self, task_type: &TaskType) -> Option<(Arc<dyn CalcHandler>, CachePolicy)> {
        self.handlers
            .get(task_type)
            .map(|r| (Arc::clone(&r.handler), r.policy.clone()))
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Wrap a synchronous pure function as a [`CalcHandler`].
///
/// Convenient for calculation modules whose work is quick and non-blocking.
pub fn handler_fn<F>(f: F) -> Arc<dyn CalcHandler>
where
    F: Fn(&Value) -> Result<Value, HandlerFailure> + Send + Sync + 'static,
{
    struct FnHandler<F>(F);

    #[async_trait]
    impl<F> CalcHandler for FnHandler<F>
    where
        F: Fn(&Value) -> Result<Value, HandlerFailure> + Send + Sync + 'static,
    {
        async fn run(&self, inputs: &Value) -> Result<Value, HandlerFailure> {
            (self.0)(inputs)
        }
    }

    Arc::new(FnHandler(f))
}
