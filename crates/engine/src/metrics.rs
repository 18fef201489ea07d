//! Per-task execution statistics and engine-wide counters.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use calcgrid_core::TaskType;

/// Terminal outcome kind of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeKind {
    Success,
    HandlerError,
    Timeout,
    Canceled,
}

/// Aggregated engine metrics exposed for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    /// Completed tasks (any terminal outcome) by task type.
    pub completed: HashMap<String, u64>,
    /// Successful tasks by task type.
    pub succeeded_by_type: HashMap<String, u64>,
    /// Average successful-execution duration by task type.
    pub avg_duration: HashMap<String, Duration>,
    /// Last completion time by task type.
    pub last_completed: HashMap<String, DateTime<Utc>>,
    pub succeeded: u64,
    pub handler_errors: u64,
    pub timeouts: u64,
    pub canceled: u64,
    /// Filled from the result cache when a snapshot is taken.
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self {
            completed: HashMap::new(),
            succeeded_by_type: HashMap::new(),
            avg_duration: HashMap::new(),
            last_completed: HashMap::new(),
            succeeded: 0,
            handler_errors: 0,
            timeouts: 0,
            canceled: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }
}

impl EngineMetrics {
    /// Record one terminal outcome. `duration` is the handler execution
    /// time and only folds into the average for successes.
    pub fn record(&mut self, task_type: &TaskType, kind: OutcomeKind, duration: Duration) {
        let name = task_type.as_str();
        *self.completed.entry(name.to_string()).or_default() += 1;
        self.last_completed.insert(name.to_string(), Utc::now());

        match kind {
            OutcomeKind::Success => {
                self.succeeded += 1;
                self.fold_duration(name, duration);
            }
            OutcomeKind::HandlerError => self.handler_errors += 1,
            OutcomeKind::Timeout => self.timeouts += 1,
            OutcomeKind::Canceled => self.canceled += 1,
        }
    }

    /// Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
    fn fold_duration(&mut self, name: &str, duration: Duration) {
        let count = self.succeeded_count_for(name) + 1;
        let prev_avg = self.avg_duration.get(name).copied().unwrap_or_default();

        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_duration.insert(name.to_string(), new_avg);
        *self.succeeded_by_type.entry(name.to_string()).or_default() += 1;
    }

    fn succeeded_count_for(&self, name: &str) -> u64 {
        self.succeeded_by_type.get(name).copied().unwrap_or(0)
    }
}
