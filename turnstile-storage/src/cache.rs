//! Cache manager
//!
//! A thin, fail-open layer over a [`KeyValueStore`]. Values are stored as
//! JSON text with a per-entry TTL. A store error on any call is logged and
//! turned into the operation's safe default (miss, no-op, zero), so callers
//! never see infrastructure faults.
//!
//! The instance settles into [`ComponentState::Enabled`] or
//! [`ComponentState::Disabled`] once, at construction, and never changes.

use std::fmt;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use turnstile_core::{StoreError, StoreResult};

use crate::store::KeyValueStore;

/// Terminal state of a cache manager or rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    /// The construction-time probe succeeded.
    Enabled,
    /// Constructed disabled, or the probe failed.
    Disabled,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentState::Enabled => f.write_str("enabled"),
            ComponentState::Disabled => f.write_str("disabled"),
        }
    }
}

/// Probe `store` and return it only if it answered.
pub(crate) async fn probe(
    component: &'static str,
    store: Arc<dyn KeyValueStore>,
    enabled: bool,
) -> Option<Arc<dyn KeyValueStore>> {
    if !enabled {
        info!(component, "Disabled by configuration");
        return None;
    }
    match store.ping().await {
        Ok(()) => {
            info!(component, endpoint = %store.endpoint(), "Connected to store");
            Some(store)
        }
        Err(e) => {
            warn!(component, endpoint = %store.endpoint(), error = %e, "Store unreachable, disabling");
            None
        }
    }
}

/// Cache usage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ops: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub misses: Option<u64>,
    /// Fraction of reads that hit (0.0 to 1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheStats {
    fn unavailable(error: Option<String>) -> Self {
        Self {
            enabled: false,
            total_ops: None,
            hits: None,
            misses: None,
            hit_rate: None,
            error,
        }
    }
}

/// Fail-open cache over a key-value store.
#[derive(Clone)]
pub struct CacheManager {
    store: Option<Arc<dyn KeyValueStore>>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("state", &self.state())
            .finish()
    }
}

impl CacheManager {
    /// Build a cache manager, probing the store when `enabled`.
    ///
    /// A failed probe disables the instance for its lifetime.
    pub async fn connect(store: Arc<dyn KeyValueStore>, enabled: bool) -> Self {
        Self {
            store: probe("cache", store, enabled).await,
        }
    }

    /// A cache manager that never touches a store.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn state(&self) -> ComponentState {
        if self.store.is_some() {
            ComponentState::Enabled
        } else {
            ComponentState::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Fetch and decode `key`. Absent on miss, decode failure or store error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(Some(raw)) => match decode(key, &raw) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Cache entry failed to decode");
                    None
                }
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "Cache get failed");
                None
            }
        }
    }

    /// Encode `value` and store it under `key` for `ttl_secs`.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let raw = match encode(key, value) {
            Ok(raw) => raw,
            Err(e) => {
                error!(key = %key, error = %e, "Cache value failed to encode");
                return;
            }
        };
        match store.set_ex(key, &raw, ttl_secs).await {
            Ok(()) => debug!(key = %key, ttl = ttl_secs, "Cache set"),
            Err(e) => error!(key = %key, error = %e, "Cache set failed"),
        }
    }

    /// Remove `key`. Idempotent.
    pub async fn delete(&self, key: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.delete(key).await {
            Ok(_) => debug!(key = %key, "Cache delete"),
            Err(e) => error!(key = %key, error = %e, "Cache delete failed"),
        }
    }

    /// Delete every key matching a glob pattern and return how many went.
    ///
    /// Keys are enumerated first and deleted one by one. A key written
    /// between the two steps survives the sweep.
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        let keys = match store.scan_match(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(pattern = %pattern, error = %e, "Cache pattern scan failed");
                return 0;
            }
        };

        let mut deleted = 0;
        for key in &keys {
            match store.delete(key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => error!(key = %key, error = %e, "Cache delete failed"),
            }
        }
        info!(pattern = %pattern, deleted, "Invalidated cache keys");
        deleted
    }

    /// Drop every key in the store's namespace.
    pub async fn flush_all(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.flush_db().await {
            Ok(()) => warn!("Cache flushed"),
            Err(e) => error!(error = %e, "Cache flush failed"),
        }
    }

    /// Usage counters from the store.
    pub async fn stats(&self) -> CacheStats {
        let Some(store) = self.store.as_ref() else {
            return CacheStats::unavailable(None);
        };
        match store.counters().await {
            Ok(counters) => CacheStats {
                enabled: true,
                total_ops: Some(counters.total_commands),
                hits: Some(counters.keyspace_hits),
                misses: Some(counters.keyspace_misses),
                hit_rate: Some(counters.hit_rate()),
                error: None,
            },
            Err(e) => {
                error!(error = %e, "Cache stats failed");
                CacheStats::unavailable(Some(e.to_string()))
            }
        }
    }

    /// Whether the store answers right now. Always false when disabled.
    pub async fn ping(&self) -> bool {
        match self.store.as_ref() {
            Some(store) => store.ping().await.is_ok(),
            None => false,
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| StoreError::serialization(key, e))
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::serialization(key, e))
}
