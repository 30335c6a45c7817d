//! Quota decisions and the store-failure policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// What the limiter does when a single store call fails.
///
/// A limiter whose store was unreachable at construction is disabled and
/// admits everything regardless of this setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request.
    #[default]
    FailOpen,
    /// Reject the request.
    FailClosed,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::FailOpen => "fail_open",
            FailurePolicy::FailClosed => "fail_closed",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_open" => Ok(FailurePolicy::FailOpen),
            "fail_closed" => Ok(FailurePolicy::FailClosed),
            other => Err(PolicyError::UnknownFailurePolicy {
                value: other.to_string(),
            }),
        }
    }
}

/// Quota telemetry attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix epoch second at which the window is considered reset.
    pub reset: i64,
    /// Window length in seconds.
    pub window: u64,
}

impl QuotaInfo {
    /// Seconds until `reset`, never negative.
    pub fn retry_after(&self, now: i64) -> i64 {
        (self.reset - now).max(0)
    }
}

/// Outcome of one admission check.
///
/// `info` is `None` when no count was observed: the limiter was disabled, the
/// policy was unusable, or the store failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub info: Option<QuotaInfo>,
}

impl QuotaDecision {
    /// Decide from the window count observed before inserting this request.
    pub fn evaluate(count: u64, limit: u32, now: i64, window: u64) -> Self {
        let allowed = count < u64::from(limit);
        let remaining = if allowed {
            u64::from(limit).saturating_sub(count + 1) as u32
        } else {
            0
        };
        Self {
            allowed,
            info: Some(QuotaInfo {
                limit,
                remaining,
                reset: now + window as i64,
                window,
            }),
        }
    }

    /// Admit without telemetry.
    pub fn bypass() -> Self {
        Self {
            allowed: true,
            info: None,
        }
    }

    /// Decision after a failed store call.
    pub fn degraded(policy: FailurePolicy) -> Self {
        Self {
            allowed: policy == FailurePolicy::FailOpen,
            info: None,
        }
    }
}
