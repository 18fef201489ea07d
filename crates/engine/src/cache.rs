//! TTL-bounded LRU cache for completed calculation results.
//!
//! Keys are task fingerprints (see `calcgrid_core::fingerprint`). Every entry
//! carries an absolute expiry; an expired entry behaves exactly like a miss
//! and is evicted on the lookup that finds it. The LRU capacity bounds total
//! memory regardless of TTLs.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use tokio::time::Instant;

use calcgrid_core::Fingerprint;

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// LRU cache mapping task fingerprint to computed result.
pub struct ResultCache {
    entries: LruCache<Fingerprint, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            ),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a non-expired result by fingerprint.
    ///
    /// An expired entry is removed, counted as a miss, and never has its
    /// life extended by the read.
    pub fn get(&mut self, fingerprint: &Fingerprint) -> Option<Value> {
        let live = match self.entries.get(fingerprint) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            _ => None,
        };
        match live {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => {
                // No-op for plain misses, evicts expired entries.
                self.entries.pop(fingerprint);
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result under the given fingerprint with a per-entry TTL.
    pub fn put(&mut self, fingerprint: Fingerprint, value: Value, ttl: Duration) {
        self.entries.put(
            fingerprint,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fp(s: &str) -> Fingerprint {
        s.to_string()
    }

    #[test]
    fn cache_hit_and_miss() {
        let mut cache = ResultCache::new(100);

        assert!(cache.get(&fp("a")).is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);

        cache.put(fp("a"), json!({"price": 420000}), Duration::from_secs(60));
        let result = cache.get(&fp("a")).unwrap();
        assert_eq!(result, json!({"price": 420000}));
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_reads_as_miss() {
        let mut cache = ResultCache::new(100);
        cache.put(fp("a"), json!(1), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cache.get(&fp("a")).is_none());
        assert_eq!(cache.misses(), 1);
        // Evicted, not resurrected by the read
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_does_not_extend_life() {
        let mut cache = ResultCache::new(100);
        cache.put(fp("a"), json!(1), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get(&fp("a")).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&fp("a")).is_none());
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let mut cache = ResultCache::new(2);
        let ttl = Duration::from_secs(60);

        cache.put(fp("a"), json!(1), ttl);
        cache.put(fp("b"), json!(2), ttl);
        cache.put(fp("c"), json!(3), ttl); // evicts "a"

        assert!(cache.get(&fp("a")).is_none());
        assert!(cache.get(&fp("b")).is_some());
        assert!(cache.get(&fp("c")).is_some());
    }

    #[test]
    fn hit_rate_calculation() {
        let mut cache = ResultCache::new(100);
        assert_eq!(cache.hit_rate(), 0.0);

        cache.put(fp("x"), json!(1), Duration::from_secs(60));
        cache.get(&fp("x")); // hit
        cache.get(&fp("y")); // miss
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
