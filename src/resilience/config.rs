//! Circuit breaker configuration.

use std::time::Duration;

/// Tuning knobs for a single circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a probe
    pub recovery_timeout: Duration,

    /// Successes required in half-open to close the circuit. Also bounds the
    /// number of concurrent half-open probes.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}
