//! Policy tables
//!
//! Two immutable lookup tables shared by the whole process:
//! - cache TTLs (seconds) keyed by semantic category
//! - request quotas (`"<count>/<period>"`) keyed by resource class
//!
//! Both tables keep insertion order. The memoizer resolves a TTL by scanning
//! categories in that order and taking the first one contained in the key
//! prefix, so the order is part of the contract.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PolicyError;

/// TTL used when neither an explicit TTL nor a category matches.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Quota class consulted when a resource class has no entry of its own.
pub const DEFAULT_QUOTA_CLASS: &str = "default";

/// Quota used when even the `default` class is missing.
pub const FALLBACK_QUOTA: &str = "100/hour";

/// Environment prefix for TTL overrides (`TURNSTILE_CACHE_TTL_DATASET_LIST`).
pub const CACHE_TTL_ENV_PREFIX: &str = "TURNSTILE_CACHE_TTL_";

/// Environment prefix for quota overrides (`TURNSTILE_RATE_LIMIT_QUERY`).
pub const RATE_LIMIT_ENV_PREFIX: &str = "TURNSTILE_RATE_LIMIT_";

const CACHE_TTL_DEFAULTS: &[(&str, u64)] = &[
    ("dataset_list", 60),
    ("dataset_content", 300),
    ("query_result", 300),
    ("session_state", 1800),
    ("pg_connection", 600),
    ("llm_models", 3600),
    ("prompt_suggestions", 300),
];

const QUOTA_DEFAULTS: &[(&str, &str)] = &[
    ("default", "100/hour"),
    ("query", "20/minute"),
    ("upload", "50/hour"),
    ("dataset_ops", "200/hour"),
    ("auth", "10/minute"),
];

// ============================================================================
// QUOTA STRINGS
// ============================================================================

/// Length of a quota window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Second,
    Minute,
    Hour,
    Day,
}

impl Period {
    /// Window length in seconds.
    pub fn as_secs(self) -> u64 {
        match self {
            Period::Second => 1,
            Period::Minute => 60,
            Period::Hour => 3600,
            Period::Day => 86_400,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Second => "second",
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
        }
    }

    /// Resolve a period name. Unrecognized names fall back to `Hour`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "second" => Period::Second,
            "minute" => Period::Minute,
            "hour" => Period::Hour,
            "day" => Period::Day,
            _ => Period::Hour,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `"<count>/<period>"` quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSpec {
    /// Requests admitted per window.
    pub count: u32,
    pub period: Period,
}

impl QuotaSpec {
    pub fn new(count: u32, period: Period) -> Self {
        Self { count, period }
    }

    /// Parse a quota string for `class`.
    ///
    /// The count must be a positive integer. The period is matched by name;
    /// an unknown period is not an error and resolves to one hour.
    pub fn parse(class: &str, spec: &str) -> Result<Self, PolicyError> {
        let malformed = |reason: &str| PolicyError::MalformedQuota {
            class: class.to_string(),
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (count, period) = spec
            .split_once('/')
            .ok_or_else(|| malformed("expected <count>/<period>"))?;
        if period.contains('/') {
            return Err(malformed("expected exactly one '/'"));
        }

        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| malformed("count is not a positive integer"))?;
        if count == 0 {
            return Err(malformed("count is not a positive integer"));
        }

        Ok(Self {
            count,
            period: Period::from_name(period.trim()),
        })
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> u64 {
        self.period.as_secs()
    }
}

impl fmt::Display for QuotaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count, self.period)
    }
}

// ============================================================================
// POLICY CONFIG
// ============================================================================

/// Cache TTL and quota tables.
///
/// Build once at startup (defaults, env overrides, builder calls) and share
/// behind an `Arc`; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    cache_ttls: Vec<(String, u64)>,
    quotas: Vec<(String, String)>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cache_ttls: CACHE_TTL_DEFAULTS
                .iter()
                .map(|(name, ttl)| (name.to_string(), *ttl))
                .collect(),
            quotas: QUOTA_DEFAULTS
                .iter()
                .map(|(class, spec)| (class.to_string(), spec.to_string()))
                .collect(),
        }
    }
}

impl PolicyConfig {
    /// Create a policy with the built-in defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy with no categories and no quota classes.
    pub fn empty() -> Self {
        Self {
            cache_ttls: Vec::new(),
            quotas: Vec::new(),
        }
    }

    /// Create a policy from the defaults plus environment overrides.
    ///
    /// Environment variables:
    /// - `TURNSTILE_CACHE_TTL_<CATEGORY>`: TTL seconds, e.g. `TURNSTILE_CACHE_TTL_LLM_MODELS=7200`
    /// - `TURNSTILE_RATE_LIMIT_<CLASS>`: quota string, e.g. `TURNSTILE_RATE_LIMIT_QUERY=30/minute`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`PolicyConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        for (category, ttl) in config.cache_ttls.iter_mut() {
            let var = format!("{}{}", CACHE_TTL_ENV_PREFIX, category.to_uppercase());
            if let Some(raw) = lookup(&var) {
                match raw.trim().parse::<u64>() {
                    Ok(value) => *ttl = value,
                    Err(_) => warn!(%var, value = %raw, "Ignoring unparseable cache TTL override"),
                }
            }
        }

        for (class, spec) in config.quotas.iter_mut() {
            let var = format!("{}{}", RATE_LIMIT_ENV_PREFIX, class.to_uppercase());
            if let Some(raw) = lookup(&var) {
                *spec = raw.trim().to_string();
            }
        }

        config
    }

    /// Set (or replace) the TTL for a cache category.
    pub fn with_cache_ttl(mut self, category: impl Into<String>, ttl_secs: u64) -> Self {
        let category = category.into();
        match self.cache_ttls.iter_mut().find(|(name, _)| *name == category) {
            Some(entry) => entry.1 = ttl_secs,
            None => self.cache_ttls.push((category, ttl_secs)),
        }
        self
    }

    /// Set (or replace) the quota string for a resource class.
    pub fn with_quota(mut self, class: impl Into<String>, spec: impl Into<String>) -> Self {
        let class = class.into();
        let spec = spec.into();
        match self.quotas.iter_mut().find(|(name, _)| *name == class) {
            Some(entry) => entry.1 = spec,
            None => self.quotas.push((class, spec)),
        }
        self
    }

    /// TTL configured for an exact category name.
    pub fn cache_ttl(&self, category: &str) -> Option<u64> {
        self.cache_ttls
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, ttl)| *ttl)
    }

    /// TTL for a cache key prefix: the first category contained in `prefix`,
    /// otherwise [`DEFAULT_CACHE_TTL_SECS`].
    pub fn ttl_for_prefix(&self, prefix: &str) -> u64 {
        self.cache_ttls
            .iter()
            .find(|(name, _)| prefix.contains(name.as_str()))
            .map(|(_, ttl)| *ttl)
            .unwrap_or(DEFAULT_CACHE_TTL_SECS)
    }

    /// Iterate cache categories in lookup order.
    pub fn cache_ttls(&self) -> impl Iterator<Item = (&str, u64)> {
        self.cache_ttls.iter().map(|(name, ttl)| (name.as_str(), *ttl))
    }

    /// Raw quota string for a class, falling back to the `default` class and
    /// then to [`FALLBACK_QUOTA`].
    pub fn quota_str(&self, class: &str) -> &str {
        self.lookup_quota(class)
            .or_else(|| self.lookup_quota(DEFAULT_QUOTA_CLASS))
            .unwrap_or(FALLBACK_QUOTA)
    }

    /// Parsed quota for a class.
    pub fn quota(&self, class: &str) -> Result<QuotaSpec, PolicyError> {
        QuotaSpec::parse(class, self.quota_str(class))
    }

    /// Iterate quota classes in table order.
    pub fn quotas(&self) -> impl Iterator<Item = (&str, &str)> {
        self.quotas
            .iter()
            .map(|(class, spec)| (class.as_str(), spec.as_str()))
    }

    /// Every quota entry that fails to parse.
    pub fn malformed_quotas(&self) -> Vec<PolicyError> {
        self.quotas
            .iter()
            .filter_map(|(class, spec)| QuotaSpec::parse(class, spec).err())
            .collect()
    }

    fn lookup_quota(&self, class: &str) -> Option<&str> {
        self.quotas
            .iter()
            .find(|(name, _)| name == class)
            .map(|(_, spec)| spec.as_str())
    }
}
