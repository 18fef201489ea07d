//! Bounded priority queue for tasks awaiting a free worker slot.
//!
//! Ordering is priority-descending with FIFO tie-break: a higher-priority
//! task submitted later overtakes lower-priority tasks already queued, while
//! equal priorities dispatch in submission order. Insertion is
//! priority-ordered, so `pop` is always the front element and dispatch order
//! is deterministic for a given submission sequence.

use std::cmp::Reverse;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;

use calcgrid_core::{CalcResult, Fingerprint, TaskId, TaskType};

use crate::error::EngineError;

/// Completion sink resolving a task's future exactly once.
pub type TaskSender = oneshot::Sender<Result<CalcResult, EngineError>>;

/// How a successful result should be cached, resolved at admission.
#[derive(Debug, Clone)]
pub struct CachePlan {
    pub fingerprint: Fingerprint,
    pub ttl: Duration,
}

/// A task admitted to the engine but not yet completed.
#[derive(Debug)]
pub struct PendingTask {
    pub id: TaskId,
    pub task_type: TaskType,
    pub inputs: serde_json::Value,
    /// `None` when caching is disabled or the type is not cacheable.
    pub cache: Option<CachePlan>,
    pub priority: u32,
    /// Monotonic submission sequence, the FIFO tie-break.
    pub seq: u64,
    pub submitted_at: DateTime<Utc>,
    /// Absolute deadline: submission instant + timeout.
    pub deadline: Instant,
    pub timeout: Duration,
    pub tx: TaskSender,
}

/// Bounded, priority-ordered backlog of pending tasks.
pub struct TaskQueue {
    items: Vec<PendingTask>,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert in (priority desc, sequence asc) order; hands the task back
    /// when at capacity.
    pub fn push(&mut self, task: PendingTask) -> Result<(), PendingTask> {
        if self.items.len() >= self.capacity {
            return Err(task);
        }
        let key = (Reverse(task.priority), task.seq);
        let at = self
            .items
            .partition_point(|t| (Reverse(t.priority), t.seq) < key);
        self.items.insert(at, task);
        Ok(())
    }

    /// Remove and return the highest-priority, earliest-submitted task.
    pub fn pop(&mut self) -> Option<PendingTask> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Remove a specific task (cancellation, queued-deadline expiry).
    pub fn remove(&mut self, id: &TaskId) -> Option<PendingTask> {
        let at = self.items.iter().position(|t| &t.id == id)?;
        Some(self.items.remove(at))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.items.iter().any(|t| &t.id == id)
    }
}
