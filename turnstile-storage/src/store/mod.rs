//! Backing store contract.
//!
//! Everything the cache and the limiter need from a key-value store:
//! string get/set-with-expiry/delete, glob key enumeration, flush, liveness
//! and aggregate counters, plus the two sorted-set sequences used by the
//! sliding window. [`RedisStore`] is the networked implementation;
//! [`InMemoryStore`] is a substitutable fake with the same semantics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use turnstile_core::StoreResult;

mod memory;
mod redis_store;

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;

/// Aggregate counters reported by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounters {
    /// Commands processed since the store started.
    pub total_commands: u64,
    /// Reads that found a key.
    pub keyspace_hits: u64,
    /// Reads that found nothing.
    pub keyspace_misses: u64,
}

impl StoreCounters {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.keyspace_hits + self.keyspace_misses;
        if total == 0 {
            0.0
        } else {
            self.keyspace_hits as f64 / total as f64
        }
    }
}

/// Key-value store used by the cache manager and the rate limiter.
///
/// Implementations must be safe to share across tasks. The sliding-window
/// methods operate on a sorted set whose members and scores are epoch
/// seconds.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Human-readable location for logs (credentials removed).
    fn endpoint(&self) -> String;

    /// Liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Overwrite `key` with `value`, expiring after `ttl_secs`.
    ///
    /// A TTL of zero is rejected as an invalid expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Enumerate keys matching a glob pattern.
    async fn scan_match(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Remove every key in the active namespace.
    async fn flush_db(&self) -> StoreResult<()>;

    async fn counters(&self) -> StoreResult<StoreCounters>;

    /// Drop window entries scored at or below `window_start` and return how
    /// many remain. Records nothing.
    async fn window_count(&self, key: &str, window_start: i64) -> StoreResult<u64>;

    /// Atomic admission step of the sliding window.
    ///
    /// As one server-side transaction: drop entries scored at or below
    /// `window_start`, count the rest, and if the count is below `limit`
    /// record `now` (member and score) and set the key's expiry to
    /// `ttl_secs`. Returns the count observed before recording.
    async fn window_admit(
        &self,
        key: &str,
        now: i64,
        window_start: i64,
        limit: u32,
        ttl_secs: u64,
    ) -> StoreResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_hit_rate() {
        let counters = StoreCounters {
            total_commands: 500,
            keyspace_hits: 80,
            keyspace_misses: 20,
        };
        assert!((counters.hit_rate() - 0.8).abs() < 0.001);
        assert!((StoreCounters::default().hit_rate() - 0.0).abs() < 0.001);
    }
}
