//! # Service Health & Degradation Levels
//!
//! Derived health for each registered dependency. [`ServiceHealth`] is a pure
//! function of the associated breaker's state and error rate; it is
//! recomputed on read and on every breaker state-change event, never written
//! directly by callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::{CircuitBreaker, CircuitState};

/// Coarse health rating for a dependency or the whole system.
///
/// Ordered by severity so the system-wide level is simply the maximum across
/// registered dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DegradationLevel {
    /// Fully operational
    Full,
    /// Elevated error rate, still serving
    Reduced,
    /// Majority of calls failing
    Minimal,
    /// Circuit open, dependency unavailable
    Emergency,
}

impl DegradationLevel {
    /// Map breaker state and error rate to a degradation level.
    pub fn from_breaker(state: CircuitState, error_rate: f64) -> Self {
        if state == CircuitState::Open {
            Self::Emergency
        } else if error_rate > 0.5 {
            Self::Minimal
        } else if error_rate > 0.2 {
            Self::Reduced
        } else {
            Self::Full
        }
    }
}

/// Point-in-time health for one registered dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub healthy: bool,
    /// Average operation duration over the breaker's current window
    pub response_time: Duration,
    pub last_check: DateTime<Utc>,
    /// Failure rate over the breaker's current window (0.0 to 1.0)
    pub error_rate: f64,
    pub degradation_level: DegradationLevel,
}

impl ServiceHealth {
    /// Derive health from a breaker's current counters.
    pub fn from_breaker(breaker: &CircuitBreaker) -> Self {
        let metrics = breaker.metrics();
        Self {
            name: breaker.name().to_string(),
            healthy: metrics.is_healthy(),
            response_time: metrics.average_duration,
            last_check: Utc::now(),
            error_rate: metrics.failure_rate,
            degradation_level: DegradationLevel::from_breaker(
                metrics.current_state,
                metrics.failure_rate,
            ),
        }
    }
}
