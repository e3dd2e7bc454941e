//! # Resilience Primitives
//!
//! Per-dependency circuit breakers with lock-free state tracking. The
//! degradation coordinator owns one [`CircuitBreaker`] per registered
//! dependency and derives service health from its [`CircuitBreakerMetrics`].

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState, StateChange, StateListener};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
