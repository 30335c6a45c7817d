//! Cache and quota key derivation.
//!
//! A cache key is `{prefix}:{hash}` where `hash` is the first 16 bytes of the
//! SHA-256 digest of the canonical argument text, as 32 lowercase hex chars.
//! Canonical text lists positional arguments in call order and keyword
//! arguments sorted by name, so two calls that differ only in keyword order
//! produce the same key.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a cache key hash.
pub const CONTENT_HASH_BYTES: usize = 16;

/// Scope segment of every quota key.
pub const QUOTA_KEY_SCOPE: &str = "ratelimit";

// ============================================================================
// CALL ARGUMENTS
// ============================================================================

/// Arguments of a memoized call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument. A repeated name overwrites the earlier value.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Stable textual form: `{"args":[...],"kwargs":{...}}`.
    ///
    /// Object keys are sorted at every depth, including inside argument values.
    pub fn canonical(&self) -> String {
        let mut root = Map::new();
        root.insert(
            "args".to_string(),
            Value::Array(self.args.iter().map(sort_keys).collect()),
        );
        let kwargs: Map<String, Value> = self
            .kwargs
            .iter()
            .map(|(name, value)| (name.clone(), sort_keys(value)))
            .collect();
        root.insert("kwargs".to_string(), Value::Object(kwargs));
        Value::Object(root).to_string()
    }
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

// ============================================================================
// HASHING
// ============================================================================

/// Truncated SHA-256 of `text` as lowercase hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..CONTENT_HASH_BYTES])
}

/// Bare hash of a call's arguments, for callers that build their own keys.
pub fn cache_key(args: &CallArgs) -> String {
    content_hash(&args.canonical())
}

/// Full cache key: `{prefix}:{hash}`.
pub fn derive_cache_key(prefix: &str, args: &CallArgs) -> String {
    format!("{}:{}", prefix, cache_key(args))
}

// ============================================================================
// QUOTA KEY
// ============================================================================

/// Window-set key for one identity under one resource class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub resource_class: String,
    pub identity: String,
}

impl QuotaKey {
    pub fn new(resource_class: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            resource_class: resource_class.into(),
            identity: identity.into(),
        }
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            QUOTA_KEY_SCOPE, self.resource_class, self.identity
        )
    }
}
