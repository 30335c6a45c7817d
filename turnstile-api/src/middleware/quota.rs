//! Quota gate middleware
//!
//! Admits or rejects each request bound to a resource class against that
//! class's quota, keyed by caller identity. Admitted requests reach the
//! handler with the [`QuotaDecision`] and [`QuotaKey`] in their extensions
//! and leave with `X-RateLimit-*` headers; rejected requests get a 429 and
//! never reach the handler.
//!
//! Infrastructure faults never reject a request: a disabled limiter or an
//! unusable quota policy lets the request through untouched.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use turnstile_core::{PolicyConfig, QuotaDecision, QuotaInfo, QuotaKey, QuotaSpec};
use turnstile_storage::RateLimiter;

use super::identity::resolve_identity;
use crate::error::ThrottleBody;
use crate::telemetry::metrics;

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
static X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");

/// What the gate did with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Counted and admitted.
    Allowed,
    /// Counted and rejected with 429.
    Denied,
    /// Passed through without counting.
    Bypassed,
}

impl GateOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            GateOutcome::Allowed => "allowed",
            GateOutcome::Denied => "denied",
            GateOutcome::Bypassed => "bypassed",
        }
    }
}

/// State for the quota gate of one resource class.
#[derive(Clone)]
pub struct GateState {
    class: Arc<str>,
    limiter: RateLimiter,
    policy: Arc<PolicyConfig>,
    trust_forwarded_headers: bool,
}

impl GateState {
    pub fn new(
        class: impl Into<String>,
        limiter: RateLimiter,
        policy: Arc<PolicyConfig>,
        trust_forwarded_headers: bool,
    ) -> Self {
        Self {
            class: Arc::from(class.into()),
            limiter,
            policy,
            trust_forwarded_headers,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    fn record(&self, outcome: GateOutcome) {
        if let Some(metrics) = metrics() {
            metrics.record_quota_decision(&self.class, outcome.as_str());
        }
    }
}

/// Quota gate middleware.
///
/// Apply per resource class with `from_fn_with_state(state.gate(class), ..)`.
pub async fn quota_gate_middleware(
    State(state): State<GateState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.limiter.is_enabled() {
        state.record(GateOutcome::Bypassed);
        return next.run(request).await;
    }

    let quota = match state.policy.quota(&state.class) {
        Ok(quota) => quota,
        Err(e) => {
            warn!(class = %state.class, error = %e, "Invalid quota policy, not limiting");
            state.record(GateOutcome::Bypassed);
            return next.run(request).await;
        }
    };

    let (mut request, identity, source) =
        resolve_identity(request, state.trust_forwarded_headers).await;

    let key = QuotaKey::new(&*state.class, identity);
    let decision = state
        .limiter
        .check(&key.to_string(), quota.count, quota.window_secs())
        .await;
    debug!(
        key = %key,
        source = source.as_str(),
        allowed = decision.allowed,
        "Quota checked"
    );

    if !decision.allowed {
        state.record(GateOutcome::Denied);
        return reject(&state.limiter, &quota, decision);
    }

    state.record(if decision.info.is_some() {
        GateOutcome::Allowed
    } else {
        GateOutcome::Bypassed
    });

    request.extensions_mut().insert(decision);
    request.extensions_mut().insert(key);

    let mut response = next.run(request).await;
    if let Some(info) = decision.info {
        attach_quota_headers(&mut response, &info);
    }
    response
}

fn reject(limiter: &RateLimiter, quota: &QuotaSpec, decision: QuotaDecision) -> Response {
    let now = limiter.now();
    // A fail-closed denial carries no count; report a full window.
    let info = decision.info.unwrap_or(QuotaInfo {
        limit: quota.count,
        remaining: 0,
        reset: now + quota.window_secs() as i64,
        window: quota.window_secs(),
    });
    ThrottleBody::new(quota, &info, now).into_response()
}

fn attach_quota_headers(response: &mut Response, info: &QuotaInfo) {
    let headers = response.headers_mut();
    for (name, value) in [
        (&X_RATELIMIT_LIMIT, info.limit.to_string()),
        (&X_RATELIMIT_REMAINING, info.remaining.to_string()),
        (&X_RATELIMIT_RESET, info.reset.to_string()),
        (&X_RATELIMIT_WINDOW, info.window.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name.clone(), value);
        }
    }
}
