//! Turnstile Core - Policy and Key Types
//!
//! Pure data and pure functions shared by the storage and API crates:
//! policy tables, quota parsing, cache/quota key derivation, admission
//! decisions, the clock seam and the error taxonomy. No I/O happens here.

pub mod clock;
pub mod decision;
pub mod error;
pub mod key;
pub mod policy;

pub use clock::{Clock, SystemClock};
pub use decision::{FailurePolicy, QuotaDecision, QuotaInfo};
pub use error::{ConfigError, PolicyError, StoreError, StoreResult};
pub use key::{cache_key, content_hash, derive_cache_key, CallArgs, QuotaKey};
pub use policy::{Period, PolicyConfig, QuotaSpec, DEFAULT_CACHE_TTL_SECS};
