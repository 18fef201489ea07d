use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use calcgrid_core::{CalcResult, TaskId};

use crate::error::EngineError;
use crate::metrics::OutcomeKind;
use crate::pool::SlotId;
use crate::queue::PendingTask;
use crate::registry::CalcHandler;

use super::core::{DispatchState, RunningTask};
use super::Engine;

impl Engine {
    /// Bind a task to a slot and spawn its execution. Caller holds the
    /// state lock; the spawned task re-enters through [`Engine::complete`].
    pub(super) fn start_execution(
        &self,
        state: &mut DispatchState,
        task: PendingTask,
        slot: SlotId,
        handler: Arc<dyn CalcHandler>,
    ) {
        let remaining = task.deadline.saturating_duration_since(Instant::now());
        debug!(task_id = %task.id, task_type = %task.task_type, slot, "dispatching");

        let id = task.id.clone();
        state.running.insert(
            id.clone(),
            RunningTask {
                slot,
                task_type: task.task_type,
                cache: task.cache,
                tx: task.tx,
            },
        );

        let engine = self.clone();
        let inputs = task.inputs;
        let timeout = task.timeout;
        tokio::spawn(async move {
            let started = Instant::now();
            // The handler runs in its own task: a panic surfaces as a
            // JoinError here instead of skipping the completion path.
            let mut work = tokio::spawn(async move { handler.run(&inputs).await });
            let run = tokio::time::timeout(remaining, &mut work).await;
            let duration = started.elapsed();
            let outcome = match run {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(failure))) => Err(EngineError::Handler(failure.to_string())),
                Ok(Err(join_err)) => {
                    Err(EngineError::Handler(format!("handler panicked: {join_err}")))
                }
                Err(_elapsed) => {
                    // The slot is reclaimed whether or not the work would
                    // ever finish.
                    work.abort();
                    Err(EngineError::Timeout {
                        waited_ms: timeout.as_millis() as u64,
                    })
                }
            };
            engine.complete(&id, slot, outcome, duration);
        });
    }

    /// Completion path: exactly one of {return, error, panic, timeout}
    /// lands here per execution. Cancellation may have already claimed the
    /// task, in which case only the slot release and re-dispatch happen.
    fn complete(
        &self,
        task_id: &TaskId,
        slot: SlotId,
        outcome: Result<serde_json::Value, EngineError>,
        duration: Duration,
    ) {
        let mut state = self.inner.state.lock().unwrap();
        let entry = state.running.remove(task_id);
        state.pool.release(slot);

        match entry {
            Some(entry) => {
                let kind = match &outcome {
                    Ok(_) => OutcomeKind::Success,
                    Err(EngineError::Timeout { .. }) => OutcomeKind::Timeout,
                    Err(_) => OutcomeKind::HandlerError,
                };
                self.inner
                    .metrics
                    .write()
                    .unwrap()
                    .record(&entry.task_type, kind, duration);

                match &outcome {
                    Ok(value) => {
                        debug!(task_id = %task_id, ?duration, "task completed");
                        if let Some(plan) = &entry.cache {
                            self.inner.cache.lock().unwrap().put(
                                plan.fingerprint.clone(),
                                value.clone(),
                                plan.ttl,
                            );
                        }
                    }
                    Err(err) => warn!(task_id = %task_id, %err, "task failed"),
                }

                let _ = entry.tx.send(outcome.map(|value| CalcResult {
                    task_id: task_id.clone(),
                    task_type: entry.task_type.clone(),
                    value,
                    duration,
                    from_cache: false,
                    completed_at: Utc::now(),
                }));
            }
            // Canceled while running: outcome already delivered, result dropped.
            None => debug!(task_id = %task_id, "discarding result of canceled task"),
        }

        self.dispatch_next(&mut state);
        self.check_drained(&state);
    }

    /// Fill free slots from the queue, highest priority first. Queued
    /// tasks already past their deadline are resolved as timeouts and
    /// skipped.
    fn dispatch_next(&self, state: &mut DispatchState) {
        while state.pool.available() > 0 {
            let Some(task) = state.queue.pop() else {
                return;
            };

            if task.deadline <= Instant::now() {
                warn!(task_id = %task.id, "deadline passed while queued");
                self.resolve_queued_timeout(task);
                continue;
            }

            let handler = self
                .inner
                .registry
                .read()
                .unwrap()
                .lookup(&task.task_type)
                .map(|(handler, _)| handler);
            match handler {
                Some(handler) => {
                    // pool.available() > 0, so acquire cannot fail here
                    if let Some(slot) = state.pool.acquire(&task.id) {
                        self.start_execution(state, task, slot, handler);
                    }
                }
                // Unreachable while the registry has no removal API; keep
                // the future resolvable regardless.
                None => {
                    let task_type = task.task_type.to_string();
                    let _ = task.tx.send(Err(EngineError::UnsupportedType(task_type)));
                }
            }
        }
    }

    /// Watchdog for tasks waiting in the queue: fires at the absolute
    /// deadline and times the task out if it has not been dispatched.
    pub(super) fn spawn_deadline_watcher(&self, task_id: TaskId, deadline: Instant) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            engine.expire_queued(&task_id);
        });
    }

    fn expire_queued(&self, task_id: &TaskId) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(task) = state.queue.remove(task_id) {
            warn!(task_id = %task_id, "timed out while queued");
            self.resolve_queued_timeout(task);
            self.check_drained(&state);
        }
    }

    fn resolve_queued_timeout(&self, task: PendingTask) {
        self.inner.metrics.write().unwrap().record(
            &task.task_type,
            OutcomeKind::Timeout,
            Duration::ZERO,
        );
        let waited_ms = task.timeout.as_millis() as u64;
        let _ = task.tx.send(Err(EngineError::Timeout { waited_ms }));
    }

    /// Wake `shutdown` once nothing is queued or running.
    pub(super) fn check_drained(&self, state: &DispatchState) {
        if self.is_shutting_down() && state.queue.is_empty() && state.pool.is_idle() {
            self.inner.drained.notify_waiters();
        }
    }
}
