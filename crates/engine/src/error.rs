//! Engine error taxonomy.

use thiserror::Error;

/// Terminal and admission errors surfaced by the engine.
///
/// `UnsupportedType`, `QueueFull`, `InvalidRequest` and `ShuttingDown` are
/// returned synchronously from `submit`; the rest resolve the task's future.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no handler registered for task type: {0}")]
    UnsupportedType(String),

    #[error("queue full: capacity {capacity} reached")]
    QueueFull { capacity: usize },

    #[error("task timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("task canceled")]
    Canceled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Failure raised by a registered calculation handler.
///
/// The engine wraps this into [`EngineError::Handler`]; the cause text is
/// preserved, nothing else about the handler leaks into scheduling.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerFailure(pub String);

impl HandlerFailure {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<&str> for HandlerFailure {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HandlerFailure {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}
