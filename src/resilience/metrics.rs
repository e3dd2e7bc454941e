//! # Circuit Breaker Metrics
//!
//! Snapshot of a circuit breaker's counters for health evaluation and
//! observability. The degradation coordinator derives per-dependency health
//! from these snapshots; nothing here is independently mutable.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time metrics for a single circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls recorded since the last reset
    pub total_calls: u64,

    /// Number of successful calls since the last reset
    pub success_count: u64,

    /// Number of failed calls since the last reset
    pub failure_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Failure rate over the current window (0.0 to 1.0)
    pub failure_rate: f64,

    /// Success rate over the current window (0.0 to 1.0)
    pub success_rate: f64,

    /// Average operation duration over the current window
    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    /// Metrics for a freshly constructed (closed, idle) breaker.
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    /// Check if the metrics indicate healthy operation.
    ///
    /// Closed is healthy while the failure rate stays reasonable; half-open
    /// counts as healthy because the dependency is actively recovering.
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.5,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Human-readable state description for status surfaces.
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing dependency health",
        }
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
