//! Gated Admission Endpoints
//!
//! One route per configured resource class, each behind the quota gate for
//! that class. A caller (or an upstream service acting for one) posts to
//! `/api/v1/quota/{class}` and gets either the admission or a 429.

use axum::{middleware, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use turnstile_core::{QuotaDecision, QuotaInfo, QuotaKey};

use crate::middleware::quota_gate_middleware;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub class: String,
    pub allowed: bool,
    /// Absent when the request was not counted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaInfo>,
}

async fn admit(
    class: String,
    decision: Option<Extension<QuotaDecision>>,
    key: Option<Extension<QuotaKey>>,
) -> Json<AdmissionResponse> {
    let decision = decision.map(|Extension(d)| d).unwrap_or_else(QuotaDecision::bypass);
    Json(AdmissionResponse {
        class,
        allowed: decision.allowed,
        identity: key.map(|Extension(k)| k.identity),
        quota: decision.info,
    })
}

/// Create the gated admission router.
pub fn create_router(state: &AppState) -> Router {
    state
        .policy
        .quotas()
        .fold(Router::new(), |router, (class, _)| {
            let name = class.to_string();
            let handler = move |decision: Option<Extension<QuotaDecision>>,
                                key: Option<Extension<QuotaKey>>| {
                admit(name.clone(), decision, key)
            };
            router.route(
                &format!("/{}", class),
                post(handler).route_layer(middleware::from_fn_with_state(
                    state.gate(class),
                    quota_gate_middleware,
                )),
            )
        })
}
