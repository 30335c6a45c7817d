//! Cache-aside memoization keyed by call arguments.

use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use turnstile_core::{derive_cache_key, CallArgs, PolicyConfig};

use crate::cache::CacheManager;

/// Outcome of a memoized lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Hit,
    Miss,
}

impl LookupOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            LookupOutcome::Hit => "hit",
            LookupOutcome::Miss => "miss",
        }
    }
}

/// Receives one event per memoized lookup.
pub trait CacheObserver: Send + Sync {
    fn on_lookup(&self, prefix: &str, outcome: LookupOutcome);
}

/// Wraps computations with cache-aside behavior.
///
/// The wrapped computation must depend only on its arguments: a cached
/// result is served for up to its TTL with no signal from the computation.
/// Call [`Memoizer::invalidate_prefix`] when the underlying data changes.
#[derive(Clone)]
pub struct Memoizer {
    cache: CacheManager,
    policy: Arc<PolicyConfig>,
    observer: Option<Arc<dyn CacheObserver>>,
}

impl std::fmt::Debug for Memoizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoizer")
            .field("cache", &self.cache)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Memoizer {
    pub fn new(cache: CacheManager, policy: Arc<PolicyConfig>) -> Self {
        Self {
            cache,
            policy,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// TTL for a result stored under `prefix`.
    ///
    /// An explicit TTL wins; otherwise the first policy category contained in
    /// the prefix; otherwise the default.
    pub fn resolve_ttl(&self, prefix: &str, ttl_secs: Option<u64>) -> u64 {
        ttl_secs.unwrap_or_else(|| self.policy.ttl_for_prefix(prefix))
    }

    /// Return the cached result for `(prefix, args)`, or run `compute` and
    /// cache what it returns.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        prefix: &str,
        args: &CallArgs,
        ttl_secs: Option<u64>,
        compute: F,
    ) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = derive_cache_key(prefix, args);

        if let Some(cached) = self.cache.get::<T>(&key).await {
            self.observe(prefix, LookupOutcome::Hit);
            return cached;
        }
        self.observe(prefix, LookupOutcome::Miss);

        let value = compute().await;
        let ttl = self.resolve_ttl(prefix, ttl_secs);
        self.cache.set(&key, &value, ttl).await;
        debug!(key = %key, ttl, "Memoized result");
        value
    }

    /// Like [`Memoizer::get_or_compute`] for fallible computations.
    /// Errors are returned as-is and never cached.
    pub async fn try_get_or_compute<T, E, F, Fut>(
        &self,
        prefix: &str,
        args: &CallArgs,
        ttl_secs: Option<u64>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = derive_cache_key(prefix, args);

        if let Some(cached) = self.cache.get::<T>(&key).await {
            self.observe(prefix, LookupOutcome::Hit);
            return Ok(cached);
        }
        self.observe(prefix, LookupOutcome::Miss);

        let value = compute().await?;
        let ttl = self.resolve_ttl(prefix, ttl_secs);
        self.cache.set(&key, &value, ttl).await;
        Ok(value)
    }

    /// Drop every memoized result under `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        self.cache.invalidate_pattern(&format!("{}:*", prefix)).await
    }

    fn observe(&self, prefix: &str, outcome: LookupOutcome) {
        if let Some(observer) = &self.observer {
            observer.on_lookup(prefix, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use turnstile_core::DEFAULT_CACHE_TTL_SECS;
    use turnstile_test_utils::ManualClock;

    struct Recorder(Mutex<Vec<(String, LookupOutcome)>>);

    impl CacheObserver for Recorder {
        fn on_lookup(&self, prefix: &str, outcome: LookupOutcome) {
            self.0.lock().unwrap().push((prefix.to_string(), outcome));
        }
    }

    async fn memoizer_at(now: i64) -> (Memoizer, Arc<InMemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let cache = CacheManager::connect(store.clone(), true).await;
        (
            Memoizer::new(cache, Arc::new(PolicyConfig::default())),
            store,
            clock,
        )
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let (memo, _, _) = memoizer_at(1_000).await;
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let args = CallArgs::new().arg("ds_1").kwarg("limit", 10);

        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            vec!["a".to_string(), "b".to_string()]
        };
        let first = memo.get_or_compute("dataset_list", &args, None, compute).await;
        let second = memo.get_or_compute("dataset_list", &args, None, compute).await;

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keyword_order_shares_entry() {
        let (memo, _, _) = memoizer_at(1_000).await;
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            42u32
        };

        let a = CallArgs::new().kwarg("x", 1).kwarg("y", 2);
        let b = CallArgs::new().kwarg("y", 2).kwarg("x", 1);
        memo.get_or_compute("query_result", &a, None, compute).await;
        memo.get_or_compute("query_result", &b, None, compute).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ttl_resolution() {
        let (memo, store, _) = memoizer_at(1_000).await;
        let args = CallArgs::new();

        memo.get_or_compute("api:dataset_list", &args, None, || async { 1 }).await;
        memo.get_or_compute("custom", &args, Some(7), || async { 1 }).await;
        memo.get_or_compute("unknown", &args, None, || async { 1 }).await;

        let ttl_of = |prefix: &str| store.ttl(&derive_cache_key(prefix, &args));
        assert_eq!(ttl_of("api:dataset_list"), Some(60));
        assert_eq!(ttl_of("custom"), Some(7));
        assert_eq!(ttl_of("unknown"), Some(DEFAULT_CACHE_TTL_SECS as i64));
    }

    #[tokio::test]
    async fn test_recomputes_after_expiry() {
        let (memo, _, clock) = memoizer_at(1_000).await;
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move { counter.fetch_add(1, Ordering::SeqCst) };
        let args = CallArgs::new().arg(1);

        memo.get_or_compute("p", &args, Some(1), compute).await;
        clock.advance(1);
        memo.get_or_compute("p", &args, Some(1), compute).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let (memo, store, _) = memoizer_at(1_000).await;
        let args = CallArgs::new().arg("x");
        let result: Result<u32, String> = memo
            .try_get_or_compute("p", &args, None, || async { Err("boom".to_string()) })
            .await;
        assert!(result.is_err());
        assert!(store.keys().is_empty());

        let result: Result<u32, String> = memo
            .try_get_or_compute("p", &args, None, || async { Ok(3) })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(store.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let (memo, store, _) = memoizer_at(1_000).await;
        memo.get_or_compute("dataset_list", &CallArgs::new().arg(1), None, || async { 1 }).await;
        memo.get_or_compute("dataset_list", &CallArgs::new().arg(2), None, || async { 2 }).await;
        memo.get_or_compute("llm_models", &CallArgs::new(), None, || async { 3 }).await;

        assert_eq!(memo.invalidate_prefix("dataset_list").await, 2);
        assert_eq!(store.keys(), vec![derive_cache_key("llm_models", &CallArgs::new())]);
    }

    #[tokio::test]
    async fn test_observer_sees_hits_and_misses() {
        let (memo, _, _) = memoizer_at(1_000).await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let memo = memo.with_observer(recorder.clone());
        let args = CallArgs::new();

        memo.get_or_compute("llm_models", &args, None, || async { 1 }).await;
        memo.get_or_compute("llm_models", &args, None, || async { 1 }).await;

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("llm_models".to_string(), LookupOutcome::Miss),
                ("llm_models".to_string(), LookupOutcome::Hit),
            ]
        );
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let memo = Memoizer::new(CacheManager::disabled(), Arc::new(PolicyConfig::default()));
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            "fresh".to_string()
        };
        memo.get_or_compute("p", &CallArgs::new(), None, compute).await;
        memo.get_or_compute("p", &CallArgs::new(), None, compute).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
