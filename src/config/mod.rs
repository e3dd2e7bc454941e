//! # Configuration
//!
//! TOML-driven configuration for the resilience core. Breaker settings follow
//! the global-defaults-plus-per-component-overrides pattern: a dependency
//! without an explicit `[resilience.components.<name>]` block inherits
//! `[resilience.defaults]`.
//!
//! ```toml
//! [database]
//! url = "postgres://localhost/retail"
//! max_connections = 20
//!
//! [resilience.defaults]
//! failure_threshold = 5
//! recovery_timeout_seconds = 30
//!
//! [resilience.components.loyalty-ledger]
//! failure_threshold = 3
//! recovery_timeout_seconds = 10
//!
//! [loyalty]
//! fraud_threshold = 5
//! fraud_window_minutes = 60
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::database::DatabasePoolConfig;
use crate::error::RetailError;
use crate::resilience::CircuitBreakerConfig;

/// Top-level configuration for the resilience core.
#[derive(Debug, Clone, Deserialize)]
pub struct RetailCoreConfig {
    pub database: DatabasePoolConfig,

    #[serde(default)]
    pub resilience: ResilienceSettings,

    #[serde(default)]
    pub loyalty: LoyaltyConfig,
}

impl RetailCoreConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, RetailError> {
        toml::from_str(content).map_err(|e| RetailError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RetailError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RetailError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

/// Circuit breaker settings: global defaults plus per-component overrides
/// keyed by dependency name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default)]
    pub defaults: BreakerSettings,

    #[serde(default)]
    pub components: HashMap<String, BreakerSettings>,
}

impl ResilienceSettings {
    /// Breaker configuration for a named dependency, falling back to the
    /// global defaults when no component override exists.
    pub fn breaker_config_for(&self, name: &str) -> CircuitBreakerConfig {
        self.components
            .get(name)
            .unwrap_or(&self.defaults)
            .to_breaker_config()
    }
}

/// Serializable breaker settings (durations in seconds, as configured).
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout_seconds")]
    pub recovery_timeout_seconds: u64,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl BreakerSettings {
    /// Convert to the resilience module's Duration-based config.
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
            success_threshold: self.success_threshold,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout_seconds(),
            success_threshold: default_success_threshold(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_seconds() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    1
}

/// Loyalty ledger policy knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyConfig {
    /// Trailing window examined by the accrual fraud check
    #[serde(default = "default_fraud_window_minutes")]
    pub fraud_window_minutes: u64,

    /// Ledger entries within the window at which accruals are flagged
    #[serde(default = "default_fraud_threshold")]
    pub fraud_threshold: u32,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            fraud_window_minutes: default_fraud_window_minutes(),
            fraud_threshold: default_fraud_threshold(),
        }
    }
}

fn default_fraud_window_minutes() -> u64 {
    60
}

fn default_fraud_threshold() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_applies_defaults() {
        let config = RetailCoreConfig::from_toml_str(
            r#"
            [database]
            url = "postgres://localhost/retail"
            "#,
        )
        .expect("minimal config parses");

        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.resilience.defaults.failure_threshold, 5);
        assert_eq!(config.loyalty.fraud_threshold, 5);
        assert_eq!(config.loyalty.fraud_window_minutes, 60);
    }

    #[test]
    fn test_component_override_wins_over_defaults() {
        let config = RetailCoreConfig::from_toml_str(
            r#"
            [database]
            url = "postgres://localhost/retail"

            [resilience.defaults]
            failure_threshold = 10

            [resilience.components.loyalty-ledger]
            failure_threshold = 3
            recovery_timeout_seconds = 10
            "#,
        )
        .expect("config parses");

        let ledger = config.resilience.breaker_config_for("loyalty-ledger");
        assert_eq!(ledger.failure_threshold, 3);
        assert_eq!(ledger.recovery_timeout, Duration::from_secs(10));

        let other = config.resilience.breaker_config_for("payment-gateway");
        assert_eq!(other.failure_threshold, 10);
        assert_eq!(other.recovery_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let err = RetailCoreConfig::from_toml_str("not toml at all [").unwrap_err();
        assert!(matches!(err, RetailError::Config(_)));
    }
}
