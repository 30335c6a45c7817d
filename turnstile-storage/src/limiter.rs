//! Sliding-window rate limiter
//!
//! Each quota key maps to a sorted set of admission timestamps in the store.
//! A check prunes entries older than the window, counts what is left and, if
//! the count is under the limit, records the current second. The three steps
//! run as one store-side transaction ([`KeyValueStore::window_admit`]), so
//! concurrent checks on the same key cannot both admit past the limit.
//!
//! The member recorded for an admission is the epoch second itself. Two
//! admissions for the same key within one second therefore collapse into a
//! single member and count once.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};
use turnstile_core::{Clock, FailurePolicy, QuotaDecision, SystemClock};

use crate::cache::{probe, ComponentState};
use crate::store::KeyValueStore;

/// Store-backed sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
    failure_policy: FailurePolicy,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("state", &self.state())
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl RateLimiter {
    /// Build a limiter, probing the store when `enabled`.
    ///
    /// A failed probe disables the instance for its lifetime; a disabled
    /// limiter admits every request.
    pub async fn connect(
        store: Arc<dyn KeyValueStore>,
        enabled: bool,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            store: probe("rate_limiter", store, enabled).await,
            clock: Arc::new(SystemClock),
            failure_policy,
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
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

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Current time as seen by this limiter.
    pub fn now(&self) -> i64 {
        self.clock.now_epoch_secs()
    }

    /// Admit or deny one request against `limit` per `window_secs`.
    pub async fn check(&self, key: &str, limit: u32, window_secs: u64) -> QuotaDecision {
        let Some(store) = self.store.as_ref() else {
            return QuotaDecision::bypass();
        };

        let now = self.clock.now_epoch_secs();
        let window_start = now - window_secs as i64;

        match store
            .window_admit(key, now, window_start, limit, window_secs + 1)
            .await
        {
            Ok(count) => {
                let decision = QuotaDecision::evaluate(count, limit, now, window_secs);
                if !decision.allowed {
                    warn!(key = %key, count, limit, "Rate limit exceeded");
                }
                decision
            }
            Err(e) => {
                error!(
                    key = %key,
                    error = %e,
                    policy = %self.failure_policy,
                    "Rate limit check failed"
                );
                QuotaDecision::degraded(self.failure_policy)
            }
        }
    }

    /// Forget every recorded request for `key`. Returns whether it existed.
    pub async fn reset_limit(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        match store.delete(key).await {
            Ok(existed) => {
                info!(key = %key, existed, "Rate limit reset");
                existed
            }
            Err(e) => {
                error!(key = %key, error = %e, "Rate limit reset failed");
                false
            }
        }
    }

    /// Requests still available for `key` in the current window, without
    /// recording one. Returns `limit` when disabled or on store error.
    pub async fn get_remaining(&self, key: &str, limit: u32, window_secs: u64) -> u32 {
        let Some(store) = self.store.as_ref() else {
            return limit;
        };
        let window_start = self.clock.now_epoch_secs() - window_secs as i64;
        match store.window_count(key, window_start).await {
            Ok(count) => u64::from(limit).saturating_sub(count) as u32,
            Err(e) => {
                error!(key = %key, error = %e, "Rate limit remaining lookup failed");
                limit
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use turnstile_test_utils::assertions::{assert_admitted, assert_denied};
    use turnstile_test_utils::{ManualClock, SteppingClock};

    async fn limiter_at(now: i64) -> (RateLimiter, Arc<InMemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let limiter = RateLimiter::connect(store.clone(), true, FailurePolicy::FailOpen)
            .await
            .with_clock(clock.clone());
        (limiter, store, clock)
    }

    #[tokio::test]
    async fn test_admission_boundary() {
        let (limiter, _, clock) = limiter_at(1_700_000_000).await;
        for remaining in [2, 1, 0] {
            assert_admitted(&limiter.check("ratelimit:query:u1", 3, 60).await, remaining);
            clock.advance(1);
        }

        let denied = limiter.check("ratelimit:query:u1", 3, 60).await;
        assert_denied(&denied);
        assert_eq!(denied.info.unwrap().reset, 1_700_000_003 + 60);
    }

    #[tokio::test]
    async fn test_denied_request_is_not_recorded() {
        let (limiter, store, clock) = limiter_at(1_000).await;
        limiter.check("k", 1, 60).await;
        clock.advance(1);
        assert!(!limiter.check("k", 1, 60).await.allowed);
        assert_eq!(store.window_members("k"), vec!["1000"]);
    }

    #[tokio::test]
    async fn test_window_rollover() {
        let (limiter, _, clock) = limiter_at(1_000).await;
        for _ in 0..3 {
            limiter.check("k", 3, 60).await;
            clock.advance(1);
        }
        assert!(!limiter.check("k", 3, 60).await.allowed);

        clock.advance(61);
        let decision = limiter.check("k", 3, 60).await;
        assert!(decision.allowed);
        assert_eq!(decision.info.unwrap().remaining, 2);
    }

    #[tokio::test]
    async fn test_same_second_requests_collapse() {
        let (limiter, store, _) = limiter_at(1_000).await;
        for _ in 0..5 {
            assert!(limiter.check("k", 3, 60).await.allowed);
        }
        assert_eq!(store.window_members("k"), vec!["1000"]);
    }

    #[tokio::test]
    async fn test_window_key_expires() {
        let (limiter, store, _) = limiter_at(1_000).await;
        limiter.check("k", 3, 60).await;
        assert_eq!(store.ttl("k"), Some(61));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _, _) = limiter_at(1_000).await;
        assert!(limiter.check("ratelimit:query:a", 1, 60).await.allowed);
        assert!(limiter.check("ratelimit:query:b", 1, 60).await.allowed);
        assert!(!limiter.check("ratelimit:query:a", 1, 60).await.allowed);
    }

    #[tokio::test]
    async fn test_get_remaining_is_read_only() {
        let (limiter, store, clock) = limiter_at(1_000).await;
        assert_eq!(limiter.get_remaining("k", 5, 60).await, 5);
        limiter.check("k", 5, 60).await;
        clock.advance(1);
        limiter.check("k", 5, 60).await;
        assert_eq!(limiter.get_remaining("k", 5, 60).await, 3);
        assert_eq!(limiter.get_remaining("k", 5, 60).await, 3);
        assert_eq!(store.window_members("k").len(), 2);
    }

    #[tokio::test]
    async fn test_reset_limit() {
        let (limiter, _, _) = limiter_at(1_000).await;
        assert!(limiter.check("k", 1, 60).await.allowed);
        assert!(!limiter.check("k", 1, 60).await.allowed);
        assert!(limiter.reset_limit("k").await);
        assert!(!limiter.reset_limit("k").await);
        assert!(limiter.check("k", 1, 60).await.allowed);
    }

    #[tokio::test]
    async fn test_disabled_limiter_bypasses() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::connect(store.clone(), false, FailurePolicy::FailClosed).await;
        assert_eq!(limiter.state(), ComponentState::Disabled);
        for _ in 0..10 {
            assert_eq!(limiter.check("k", 1, 60).await, QuotaDecision::bypass());
        }
        assert_eq!(limiter.get_remaining("k", 7, 60).await, 7);
        assert!(!limiter.reset_limit("k").await);
        assert!(store.keys().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_exceed_limit() {
        let store = Arc::new(InMemoryStore::with_clock(Arc::new(ManualClock::new(1_000))));
        // Every check sees a new second, so no two admissions collapse.
        let limiter = RateLimiter::connect(store.clone(), true, FailurePolicy::FailOpen)
            .await
            .with_clock(Arc::new(SteppingClock::new(1_000)));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check("ratelimit:query:shared", 10, 3_600).await
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(store.window_members("ratelimit:query:shared").len(), 10);
    }
}
