use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a submitted calculation task.
///
/// Callers may supply their own id; otherwise one is generated at submission.
pub type TaskId = String;

/// Generate a fresh task id.
pub fn new_task_id() -> TaskId {
    Uuid::new_v4().to_string()
}

/// Kind of calculation a task performs.
///
/// The engine never looks inside a handler's result; the type only selects
/// which registered handler runs and namespaces the cache fingerprint.
/// `Custom` covers handler types registered by plugins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TaskType {
    Valuation,
    RiskAnalysis,
    Optimization,
    Prediction,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::Valuation => "valuation",
            TaskType::RiskAnalysis => "risk-analysis",
            TaskType::Optimization => "optimization",
            TaskType::Prediction => "prediction",
            TaskType::Custom(name) => name,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        match s {
            "valuation" => TaskType::Valuation,
            "risk-analysis" => TaskType::RiskAnalysis,
            "optimization" => TaskType::Optimization,
            "prediction" => TaskType::Prediction,
            other => TaskType::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        TaskType::from(s.as_str())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

/// A calculation submission as seen by callers of the engine.
///
/// `priority` is numeric, higher = dispatched sooner; ties are broken by
/// submission order. `timeout` falls back to the engine's `default_timeout`
/// when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcRequest {
    pub task_type: TaskType,
    /// Opaque structured inputs, forwarded verbatim to the handler.
    pub inputs: Value,
    /// Caller-supplied id; generated when `None`.
    #[serde(default)]
    pub id: Option<TaskId>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Per-task timeout override.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

fn default_priority() -> u32 {
    1
}

impl CalcRequest {
    /// Create a request with default priority and the engine-wide timeout.
    pub fn new(task_type: TaskType, inputs: Value) -> Self {
        Self {
            task_type,
            inputs,
            id: None,
            priority: default_priority(),
            timeout: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Successful terminal outcome of a calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcResult {
    pub task_id: TaskId,
    pub task_type: TaskType,
    /// Handler output, opaque to the engine.
    pub value: Value,
    /// Handler execution time. Zero for cache hits.
    pub duration: Duration,
    /// Whether this result was served from the cache.
    pub from_cache: bool,
    pub completed_at: DateTime<Utc>,
}
