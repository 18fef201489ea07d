use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_opt(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// Engine configuration, from env vars or deserialized from JSON/TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker slots. 0 = host core count.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Maximum number of tasks waiting for a free slot.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Timeout applied when a task omits its own, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// Whether completed results are cached and reused.
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// Default cache entry lifetime in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Maximum cached entries before LRU eviction kicks in.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_max_workers() -> usize { 0 }
fn default_queue_size() -> usize { 100 }
fn default_timeout_seconds() -> u64 { 30 }
fn default_cache_enabled() -> bool { true }
fn default_cache_ttl() -> u64 { 300 }
fn default_cache_max_entries() -> usize { 1024 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_size: default_queue_size(),
            default_timeout_seconds: default_timeout_seconds(),
            cache_enabled: default_cache_enabled(),
            cache_ttl_seconds: default_cache_ttl(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

impl EngineConfig {
    /// Build config from `CALC_*` environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            max_workers: env_usize("CALC_MAX_WORKERS", default_max_workers()),
            queue_size: env_usize("CALC_QUEUE_SIZE", default_queue_size()),
            default_timeout_seconds: env_u64(
                "CALC_DEFAULT_TIMEOUT_SECONDS",
                default_timeout_seconds(),
            ),
            cache_enabled: env_bool("CALC_CACHE_ENABLED", default_cache_enabled()),
            cache_ttl_seconds: env_u64("CALC_CACHE_TTL_SECONDS", default_cache_ttl()),
            cache_max_entries: env_usize("CALC_CACHE_MAX_ENTRIES", default_cache_max_entries()),
        }
    }

    /// Resolve worker slot count (0 means use available parallelism).
    pub fn resolved_max_workers(&self) -> usize {
        if self.max_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_workers
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Engine config:");
        tracing::info!("  workers:  max={}", self.resolved_max_workers());
        tracing::info!("  queue:    size={}", self.queue_size);
        tracing::info!("  timeout:  default={}s", self.default_timeout_seconds);
        tracing::info!(
            "  cache:    enabled={}, ttl={}s, max_entries={}",
            self.cache_enabled,
            self.cache_ttl_seconds,
            self.cache_max_entries
        );
    }
}
