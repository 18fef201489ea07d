use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use calcgrid_core::{fingerprint, new_task_id, CalcRequest, CalcResult, TaskId};

use crate::error::EngineError;
use crate::metrics::OutcomeKind;
use crate::queue::{CachePlan, PendingTask};

use super::Engine;

/// Handle to an admitted task: its id plus the pending future.
#[derive(Debug)]
pub struct Submission {
    pub task_id: TaskId,
    pub(super) rx: oneshot::Receiver<Result<CalcResult, EngineError>>,
}

impl Submission {
    /// Await the terminal outcome. Resolves exactly once; the error side
    /// carries timeout, handler failure, or cancellation.
    pub async fn wait(self) -> Result<CalcResult, EngineError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without resolving: engine torn down mid-flight.
            Err(_) => Err(EngineError::ShuttingDown),
        }
    }
}

impl Engine {
    /// Submit a calculation. Returns synchronously with the pending
    /// [`Submission`], or fails fast with `UnsupportedType`,
    /// `InvalidRequest`, `QueueFull`, or `ShuttingDown`.
    ///
    /// Admission order: cache hit (no slot consumed), idle slot, queue
    /// room, rejection.
    pub fn submit(&self, request: CalcRequest) -> Result<Submission, EngineError> {
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }
        if request.priority == 0 {
            return Err(EngineError::InvalidRequest(
                "priority must be positive".into(),
            ));
        }
        if request.timeout.is_some_and(|t| t.is_zero()) {
            return Err(EngineError::InvalidRequest(
                "timeout must be positive".into(),
            ));
        }

        let (handler, policy) = self
            .inner
            .registry
            .read()
            .unwrap()
            .lookup(&request.task_type)
            .ok_or_else(|| EngineError::UnsupportedType(request.task_type.to_string()))?;

        let task_id = request.id.clone().unwrap_or_else(new_task_id);
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.inner.config.default_timeout());
        let cache = (self.inner.config.cache_enabled && policy.cacheable).then(|| CachePlan {
            fingerprint: fingerprint(&request.task_type, &request.inputs),
            ttl: policy.ttl.unwrap_or_else(|| self.inner.config.cache_ttl()),
        });

        // Cache hit bypasses queue and pool entirely.
        if let Some(plan) = &cache {
            let cached = self.inner.cache.lock().unwrap().get(&plan.fingerprint);
            if let Some(value) = cached {
                debug!(task_id = %task_id, task_type = %request.task_type, "cache hit");
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Ok(CalcResult {
                    task_id: task_id.clone(),
                    task_type: request.task_type,
                    value,
                    duration: Duration::ZERO,
                    from_cache: true,
                    completed_at: Utc::now(),
                }));
                return Ok(Submission { task_id, rx });
            }
        }

        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let task = PendingTask {
            id: task_id.clone(),
            task_type: request.task_type,
            inputs: request.inputs,
            cache,
            priority: request.priority,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            submitted_at: Utc::now(),
            deadline,
            timeout,
            tx,
        };

        let mut state = self.inner.state.lock().unwrap();
        if state.running.contains_key(&task.id) || state.queue.contains(&task.id) {
            return Err(EngineError::InvalidRequest(format!(
                "task id already pending: {task_id}"
            )));
        }
        if let Some(slot) = state.pool.acquire(&task.id) {
            self.start_execution(&mut state, task, slot, handler);
        } else {
            let capacity = state.queue.capacity();
            match state.queue.push(task) {
                Ok(()) => {
                    drop(state);
                    debug!(task_id = %task_id, "queued, no free slot");
                    self.spawn_deadline_watcher(task_id.clone(), deadline);
                }
                Err(_rejected) => {
                    // Synchronous rejection; the caller's future never existed.
                    return Err(EngineError::QueueFull { capacity });
                }
            }
        }

        Ok(Submission { task_id, rx })
    }

    /// Cancel a task by id. Queued tasks are removed and resolved with
    /// `Canceled`; running tasks resolve `Canceled` immediately while the
    /// handler's eventual result is discarded (best-effort). Returns
    /// whether a pending task was found.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(task) = state.queue.remove(task_id) {
            info!(task_id = %task_id, "canceled while queued");
            self.inner.metrics.write().unwrap().record(
                &task.task_type,
                OutcomeKind::Canceled,
                Duration::ZERO,
            );
            let _ = task.tx.send(Err(EngineError::Canceled));
            self.check_drained(&state);
            true
        } else if let Some(entry) = state.running.remove(task_id) {
            // Slot stays busy until the handler returns; its result is
            // then discarded and the slot released by the completion path.
            info!(task_id = %task_id, "canceled while running (best-effort)");
            self.inner.metrics.write().unwrap().record(
                &entry.task_type,
                OutcomeKind::Canceled,
                Duration::ZERO,
            );
            let _ = entry.tx.send(Err(EngineError::Canceled));
            true
        } else {
            false
        }
    }
}
