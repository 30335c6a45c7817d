//! Error types for turnstile operations

use thiserror::Error;

/// Backing store errors.
///
/// None of these ever reach an HTTP caller: the cache and the limiter catch
/// them at the call site and fall back to their documented defaults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Store operation {operation} failed: {reason}")]
    Operation { operation: String, reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },
}

impl StoreError {
    /// Shorthand for a failed store command.
    pub fn operation(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Operation {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a value that could not be encoded or decoded.
    pub fn serialization(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Quota policy errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Malformed quota for class {class}: {spec:?} ({reason})")]
    MalformedQuota {
        class: String,
        spec: String,
        reason: String,
    },

    #[error("Unknown failure policy: {value}")]
    UnknownFailurePolicy { value: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Result type alias for backing store calls.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_unreachable() {
        let err = StoreError::Unreachable {
            endpoint: "redis://localhost:6379/0".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("unreachable"));
        assert!(msg.contains("redis://localhost:6379/0"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_store_error_shorthands() {
        let err = StoreError::operation("ZCARD", "broken pipe");
        assert_eq!(
            err,
            StoreError::Operation {
                operation: "ZCARD".to_string(),
                reason: "broken pipe".to_string(),
            }
        );

        let err = StoreError::serialization("query_result:abc", "expected value");
        assert!(format!("{}", err).contains("query_result:abc"));
    }

    #[test]
    fn test_policy_error_display_malformed() {
        let err = PolicyError::MalformedQuota {
            class: "query".to_string(),
            spec: "twenty/minute".to_string(),
            reason: "count is not a positive integer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("query"));
        assert!(msg.contains("twenty/minute"));
    }
}
