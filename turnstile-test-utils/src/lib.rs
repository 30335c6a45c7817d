//! Turnstile Test Utilities
//!
//! Shared test infrastructure for the turnstile workspace:
//! - Controllable clocks
//! - Stores that fail on purpose
//! - Proptest generators for arguments and quotas
//! - Fixtures wiring components over an in-memory store
//! - Assertions on quota decisions

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

pub use turnstile_core::{
    CallArgs, Clock, FailurePolicy, Period, PolicyConfig, QuotaDecision, QuotaSpec, StoreError,
    StoreResult,
};
pub use turnstile_storage::{
    CacheManager, InMemoryStore, KeyValueStore, Memoizer, RateLimiter, StoreCounters,
};

// ============================================================================
// CLOCKS
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Move time forward by `secs`.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Clock that moves one second forward every time it is read.
#[derive(Debug)]
pub struct SteppingClock {
    next: AtomicI64,
}

impl SteppingClock {
    pub fn new(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }
}

impl Clock for SteppingClock {
    fn now_epoch_secs(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

// ============================================================================
// FAULTY STORES
// ============================================================================

/// Store that answers the liveness probe and fails every other call.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

fn broken(operation: &str) -> StoreError {
    StoreError::operation(operation, "connection reset by peer")
}

#[async_trait]
impl KeyValueStore for FailingStore {
    fn endpoint(&self) -> String {
        "failing://".to_string()
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(broken("GET"))
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> StoreResult<()> {
        Err(broken("SETEX"))
    }

    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        Err(broken("DEL"))
    }

    async fn scan_match(&self, _pattern: &str) -> StoreResult<Vec<String>> {
        Err(broken("SCAN"))
    }

    async fn flush_db(&self) -> StoreResult<()> {
        Err(broken("FLUSHDB"))
    }

    async fn counters(&self) -> StoreResult<StoreCounters> {
        Err(broken("INFO"))
    }

    async fn window_count(&self, _key: &str, _window_start: i64) -> StoreResult<u64> {
        Err(broken("ZCARD"))
    }

    async fn window_admit(
        &self,
        _key: &str,
        _now: i64,
        _window_start: i64,
        _limit: u32,
        _ttl_secs: u64,
    ) -> StoreResult<u64> {
        Err(broken("EVALSHA"))
    }
}

/// Store whose liveness probe fails. Components built on it start disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnreachableStore;

#[async_trait]
impl KeyValueStore for UnreachableStore {
    fn endpoint(&self) -> String {
        "redis://unreachable:6379/0".to_string()
    }

    async fn ping(&self) -> StoreResult<()> {
        Err(StoreError::Unreachable {
            endpoint: self.endpoint(),
            reason: "connection refused".to_string(),
        })
    }

    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(broken("GET"))
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> StoreResult<()> {
        Err(broken("SETEX"))
    }

    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        Err(broken("DEL"))
    }

    async fn scan_match(&self, _pattern: &str) -> StoreResult<Vec<String>> {
        Err(broken("SCAN"))
    }

    async fn flush_db(&self) -> StoreResult<()> {
        Err(broken("FLUSHDB"))
    }

    async fn counters(&self) -> StoreResult<StoreCounters> {
        Err(broken("INFO"))
    }

    async fn window_count(&self, _key: &str, _window_start: i64) -> StoreResult<u64> {
        Err(broken("ZCARD"))
    }

    async fn window_admit(
        &self,
        _key: &str,
        _now: i64,
        _window_start: i64,
        _limit: u32,
        _ttl_secs: u64,
    ) -> StoreResult<u64> {
        Err(broken("EVALSHA"))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for turnstile inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Generate a JSON scalar.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::from),
        ]
    }

    /// Generate a JSON value up to two levels deep.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Generate positional and keyword arguments as raw parts.
    pub fn arb_call_parts() -> impl Strategy<Value = (Vec<Value>, Vec<(String, Value)>)> {
        (
            prop::collection::vec(arb_json(), 0..4),
            prop::collection::btree_map("[a-z_]{1,10}", arb_json(), 0..5)
                .prop_map(|m| m.into_iter().collect::<Vec<_>>()),
        )
    }

    /// Build call arguments with keywords inserted in the given order.
    pub fn call_args(positional: &[Value], keywords: &[(String, Value)]) -> CallArgs {
        let args = positional
            .iter()
            .fold(CallArgs::new(), |args, value| args.arg(value.clone()));
        keywords
            .iter()
            .fold(args, |args, (name, value)| args.kwarg(name.clone(), value.clone()))
    }

    /// Generate a period.
    pub fn arb_period() -> impl Strategy<Value = Period> {
        prop_oneof![
            Just(Period::Second),
            Just(Period::Minute),
            Just(Period::Hour),
            Just(Period::Day),
        ]
    }

    /// Generate a valid quota.
    pub fn arb_quota_spec() -> impl Strategy<Value = QuotaSpec> {
        (1u32..10_000, arb_period()).prop_map(|(count, period)| QuotaSpec::new(count, period))
    }

    /// Generate a caller identity.
    pub fn arb_identity() -> impl Strategy<Value = String> {
        prop_oneof![
            "u[0-9]{1,6}",
            "10\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
            Just("unknown".to_string()),
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Components wired over one in-memory store and one manual clock.

    use super::*;

    /// Epoch second every fixture starts at (2024-01-01T00:00:00Z).
    pub const EPOCH: i64 = 1_704_067_200;

    /// A cache, memoizer and limiter sharing a store and a clock.
    pub struct Stack {
        pub clock: Arc<ManualClock>,
        pub store: Arc<InMemoryStore>,
        pub policy: Arc<PolicyConfig>,
        pub cache: CacheManager,
        pub memoizer: Memoizer,
        pub limiter: RateLimiter,
    }

    /// Enabled components with the default policy.
    pub async fn memory_stack() -> Stack {
        memory_stack_with(PolicyConfig::default()).await
    }

    /// Enabled components with a custom policy.
    pub async fn memory_stack_with(policy: PolicyConfig) -> Stack {
        let clock = Arc::new(ManualClock::new(EPOCH));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let policy = Arc::new(policy);
        let cache = CacheManager::connect(store.clone(), true).await;
        let memoizer = Memoizer::new(cache.clone(), policy.clone());
        let limiter = RateLimiter::connect(store.clone(), true, FailurePolicy::FailOpen)
            .await
            .with_clock(clock.clone());
        Stack {
            clock,
            store,
            policy,
            cache,
            memoizer,
            limiter,
        }
    }

    /// Limiter over a store that fails every call.
    pub async fn failing_limiter(policy: FailurePolicy) -> RateLimiter {
        RateLimiter::connect(Arc::new(FailingStore), true, policy).await
    }

    /// Cache over a store that fails every call.
    pub async fn failing_cache() -> CacheManager {
        CacheManager::connect(Arc::new(FailingStore), true).await
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on quota decisions.

    use super::*;

    /// Assert the request was admitted with no quota telemetry.
    #[track_caller]
    pub fn assert_bypassed(decision: &QuotaDecision) {
        assert!(decision.allowed, "Expected admission, got: {:?}", decision);
        assert!(decision.info.is_none(), "Expected no quota info, got: {:?}", decision);
    }

    /// Assert the request was admitted with `remaining` left.
    #[track_caller]
    pub fn assert_admitted(decision: &QuotaDecision, remaining: u32) {
        assert!(decision.allowed, "Expected admission, got: {:?}", decision);
        match decision.info {
            Some(info) => assert_eq!(info.remaining, remaining, "Wrong remaining"),
            None => panic!("Expected quota info, got: {:?}", decision),
        }
    }

    /// Assert the request was denied after counting.
    #[track_caller]
    pub fn assert_denied(decision: &QuotaDecision) {
        assert!(!decision.allowed, "Expected denial, got: {:?}", decision);
        match decision.info {
            Some(info) => assert_eq!(info.remaining, 0, "Denied with remaining quota"),
            None => panic!("Expected quota info, got: {:?}", decision),
        }
    }
}
