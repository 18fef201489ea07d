pub mod config;
pub mod fingerprint;
pub mod types;

pub use config::{load_dotenv, EngineConfig};
pub use fingerprint::{fingerprint, Fingerprint};
pub use types::*;
