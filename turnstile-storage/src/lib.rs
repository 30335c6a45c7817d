//! Turnstile Storage - Cache and Rate Limiter
//!
//! Store-backed components of the request-governing middleware:
//! the [`KeyValueStore`] contract with Redis and in-memory implementations,
//! the fail-open [`CacheManager`], cache-aside [`Memoizer`] and the
//! sliding-window [`RateLimiter`].

pub mod cache;
pub mod limiter;
pub mod memoize;
pub mod store;

pub use cache::{CacheManager, CacheStats, ComponentState};
pub use limiter::RateLimiter;
pub use memoize::{CacheObserver, LookupOutcome, Memoizer};
pub use store::{InMemoryStore, KeyValueStore, RedisStore, StoreCounters};
