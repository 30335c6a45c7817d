//! Middleware Module
//!
//! Request-processing stages layered onto routers:
//!
//! ```ignore
//! Router::new()
//!     .route("/query", post(handler))
//!     .route_layer(middleware::from_fn_with_state(state.gate("query"), quota_gate_middleware))
//! ```

pub mod identity;
pub mod quota;

pub use identity::{resolve_identity, IdentitySource, IDENTITY_FIELD, UNKNOWN_IDENTITY};
pub use quota::{quota_gate_middleware, GateOutcome, GateState};
