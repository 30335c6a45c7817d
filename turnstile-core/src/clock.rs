//! Wall-clock abstraction.
//!
//! The limiter's sliding window and the in-memory store's expiry both read
//! time through [`Clock`], so tests can move time forward without sleeping.

/// Source of the current Unix time in whole seconds.
pub trait Clock: Send + Sync {
    /// Get current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
