//! Turnstile API - HTTP Quota Gate and Cache Administration
//!
//! Serves per-class quota admission behind the sliding-window limiter,
//! administrative cache and quota endpoints, health checks and Prometheus
//! metrics. The cache manager, memoizer and limiter live in
//! `turnstile-storage`; this crate wires them to HTTP.

pub mod config;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode, ThrottleBody};
pub use middleware::{quota_gate_middleware, resolve_identity, GateOutcome, GateState};
pub use routes::create_api_router;
pub use state::AppState;
