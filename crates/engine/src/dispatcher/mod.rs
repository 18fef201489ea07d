//! Engine dispatcher -- admission, slot binding, and completion handling.
//!
//! Split into focused submodules:
//! - `core`: Engine struct, constructor, registration, status and shutdown
//! - `submit`: admission path, cache short-circuit, cancellation
//! - `execution`: spawned handler execution, timeout race, completion path

mod core;
mod execution;
mod submit;

pub use self::core::{Engine, EngineStatus};
pub use self::submit::Submission;
