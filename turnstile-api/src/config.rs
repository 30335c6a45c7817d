//! API Configuration Module
//!
//! Runtime settings for the turnstile server: where the backing store lives,
//! which components are switched on, how the limiter degrades, and where to
//! listen. Loaded from environment variables with defaults suitable for
//! local development.

use std::net::SocketAddr;

use turnstile_core::{ConfigError, FailurePolicy};

/// Default store URL when none is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    // ========================================================================
    // Backing Store
    // ========================================================================
    /// Connection URL for the shared key-value store.
    pub redis_url: String,

    // ========================================================================
    // Components
    // ========================================================================
    /// Whether the cache manager probes the store at startup.
    pub cache_enabled: bool,

    /// Whether the rate limiter probes the store at startup.
    pub rate_limit_enabled: bool,

    /// Limiter decision when a store call fails on an enabled limiter.
    pub failure_policy: FailurePolicy,

    /// Use `x-forwarded-for` / `x-real-ip` for caller identity.
    /// Only safe behind a proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,

    // ========================================================================
    // Server
    // ========================================================================
    /// Interface to bind.
    pub bind_host: String,

    /// Port to bind.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            cache_enabled: true,
            rate_limit_enabled: true,
            failure_policy: FailurePolicy::FailOpen,
            trust_forwarded_headers: false,
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TURNSTILE_REDIS_URL`: Store URL (default: redis://localhost:6379/0)
    /// - `TURNSTILE_CACHE_ENABLED`: "false" disables caching (default: true)
    /// - `TURNSTILE_RATE_LIMIT_ENABLED`: "false" disables limiting (default: true)
    /// - `TURNSTILE_FAILURE_POLICY`: "fail_open" or "fail_closed" (default: fail_open)
    /// - `TURNSTILE_TRUST_FORWARDED_HEADERS`: "true" or "1" (default: false)
    /// - `TURNSTILE_API_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` / `TURNSTILE_API_PORT`: Bind port (default: 8080)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let redis_url = lookup("TURNSTILE_REDIS_URL").unwrap_or(defaults.redis_url);

        let cache_enabled = lookup("TURNSTILE_CACHE_ENABLED")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let rate_limit_enabled = lookup("TURNSTILE_RATE_LIMIT_ENABLED")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let failure_policy = match lookup("TURNSTILE_FAILURE_POLICY") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "TURNSTILE_FAILURE_POLICY".to_string(),
                value: raw.clone(),
                reason: "expected fail_open or fail_closed".to_string(),
            })?,
            None => defaults.failure_policy,
        };

        let trust_forwarded_headers = lookup("TURNSTILE_TRUST_FORWARDED_HEADERS")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        let bind_host = lookup("TURNSTILE_API_BIND").unwrap_or(defaults.bind_host);

        let port = match lookup("PORT").or_else(|| lookup("TURNSTILE_API_PORT")) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                field: "PORT".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.port,
        };

        Ok(Self {
            redis_url,
            cache_enabled,
            rate_limit_enabled,
            failure_policy,
            trust_forwarded_headers,
            bind_host,
            port,
        })
    }

    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (self.cache_enabled || self.rate_limit_enabled) && self.redis_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "TURNSTILE_REDIS_URL".to_string(),
            });
        }
        Ok(())
    }

    /// Socket address to listen on.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "TURNSTILE_API_BIND".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }
}
