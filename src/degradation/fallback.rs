//! Fallback strategy configuration.
//!
//! One [`FallbackConfig`] is supplied per dependency at registration time and
//! is immutable afterwards. The coordinator walks the configured stages in
//! strict order (cache, fallback operation, static defaults) when the primary
//! operation is unavailable.

use serde_json::Value;
use std::time::Duration;

/// Fallback strategy for a single registered dependency.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Attempt a cache read before any other fallback stage, and cache
    /// successful fallback-operation results
    pub use_cache: bool,

    /// TTL for values written by the cache fallback stage
    pub cache_ttl: Duration,

    /// Serve `default_values` when every other stage fails
    pub use_default_values: bool,

    /// Opaque static default, deserialized into the caller's result type
    pub default_values: Option<Value>,

    /// Attempts for the fallback operation (minimum 1). The primary
    /// operation's retry policy belongs to the caller, not this config.
    pub retry_attempts: u32,

    /// Per-attempt timeout for the fallback operation
    pub timeout: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_ttl: Duration::from_secs(300),
            use_default_values: false,
            default_values: None,
            retry_attempts: 1,
            timeout: Duration::from_secs(5),
        }
    }
}

impl FallbackConfig {
    /// Config that serves a static default and nothing else.
    pub fn defaults_only(default_values: Value) -> Self {
        Self {
            use_cache: false,
            use_default_values: true,
            default_values: Some(default_values),
            ..Self::default()
        }
    }

    /// Config that only uses the cache stage with the given TTL.
    pub fn cache_only(cache_ttl: Duration) -> Self {
        Self {
            use_cache: true,
            cache_ttl,
            ..Self::default()
        }
    }
}
