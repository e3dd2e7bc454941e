//! # Graceful Degradation
//!
//! Coordinates per-dependency circuit breakers and fallback strategies so
//! that dependency failures degrade service instead of propagating to the
//! caller. See [`DegradationCoordinator`] for the call flow.

pub mod cache;
pub mod coordinator;
pub mod fallback;
pub mod health;

pub use cache::{FallbackCache, MemoryFallbackCache, MokaFallbackCache};
pub use coordinator::{DegradationCallback, DegradationCoordinator};
pub use fallback::FallbackConfig;
pub use health::{DegradationLevel, ServiceHealth};
