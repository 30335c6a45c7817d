//! Shared application state for Axum routers.

use std::sync::Arc;

use tracing::warn;
use turnstile_core::PolicyConfig;
use turnstile_storage::{CacheManager, KeyValueStore, Memoizer, RateLimiter, RedisStore};

use crate::config::ApiConfig;
use crate::middleware::GateState;
use crate::telemetry::MetricsCacheObserver;

/// Application-wide state shared across all routes.
///
/// Every component is constructed once here and handed to routes and
/// middleware by value; clones share the same store connection.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub policy: Arc<PolicyConfig>,
    pub cache: CacheManager,
    /// Cache-aside wrapper over `cache`, reporting lookups to Prometheus.
    /// Handlers take it as `State<Memoizer>` (see `impl_from_ref!` below).
    pub memoizer: Memoizer,
    pub limiter: RateLimiter,
    pub start_time: std::time::Instant,
}

crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(Arc<PolicyConfig>, policy);
crate::impl_from_ref!(CacheManager, cache);
crate::impl_from_ref!(Memoizer, memoizer);
crate::impl_from_ref!(RateLimiter, limiter);
crate::impl_from_ref!(std::time::Instant, start_time);

impl AppState {
    /// Assemble state from already-constructed components.
    pub fn new(
        config: ApiConfig,
        policy: PolicyConfig,
        cache: CacheManager,
        limiter: RateLimiter,
    ) -> Self {
        let policy = Arc::new(policy);
        let memoizer = Memoizer::new(cache.clone(), policy.clone())
            .with_observer(Arc::new(MetricsCacheObserver));
        Self {
            config: Arc::new(config),
            policy,
            cache,
            memoizer,
            limiter,
            start_time: std::time::Instant::now(),
        }
    }

    /// Connect to the configured store and build every component over it.
    ///
    /// Never fails: an unreachable store leaves the cache and limiter
    /// disabled and the server runs without them.
    pub async fn connect(config: ApiConfig, policy: PolicyConfig) -> Self {
        for err in policy.malformed_quotas() {
            warn!(error = %err, "Quota policy will bypass limiting");
        }

        if !config.cache_enabled && !config.rate_limit_enabled {
            return Self::new(config, policy, CacheManager::disabled(), RateLimiter::disabled());
        }

        match RedisStore::connect(&config.redis_url).await {
            Ok(store) => {
                let store: Arc<dyn KeyValueStore> = Arc::new(store);
                Self::over_store(config, policy, store).await
            }
            Err(e) => {
                warn!(error = %e, "Store unreachable, cache and rate limiter disabled");
                Self::new(config, policy, CacheManager::disabled(), RateLimiter::disabled())
            }
        }
    }

    /// Build every component over the given store, honoring the enable flags.
    pub async fn over_store(
        config: ApiConfig,
        policy: PolicyConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let cache = CacheManager::connect(store.clone(), config.cache_enabled).await;
        let limiter =
            RateLimiter::connect(store, config.rate_limit_enabled, config.failure_policy).await;
        Self::new(config, policy, cache, limiter)
    }

    /// Gate state for one resource class.
    pub fn gate(&self, class: impl Into<String>) -> GateState {
        GateState::new(
            class,
            self.limiter.clone(),
            self.policy.clone(),
            self.config.trust_forwarded_headers,
        )
    }
}
