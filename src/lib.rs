//! # retail-core
//!
//! Resilience and transactional-consistency core for the retail management
//! platform. Protects the rest of the application from partial failures of
//! its dependencies (database, cache, external payment/loyalty integrations)
//! and applies exactly-once loyalty-point bookkeeping under concurrent
//! access.
//!
//! ## Components
//!
//! - [`database::ConnectionPool`] — bounded Postgres pool with timed
//!   statements, atomic transactions, and pool health reporting
//! - [`resilience::CircuitBreaker`] — per-dependency breaker with
//!   Closed/Open/HalfOpen gating and state-change notifications
//! - [`degradation::DegradationCoordinator`] — the single entry point for
//!   degradable operations: breaker gating plus a cache → fallback-operation
//!   → static-defaults fallback chain, and the system-wide degradation level
//! - [`loyalty::LoyaltyLedger`] — idempotent, fraud-aware loyalty-point
//!   accrual and reversal inside database transactions
//!
//! ## Wiring
//!
//! The coordinator and ledger are plainly constructed and injected by the
//! application's startup wiring; nothing in this crate is a process-global.
//!
//! ```rust,ignore
//! let config = RetailCoreConfig::from_file("retail.toml")?;
//! let pool = Arc::new(ConnectionPool::connect(&config.database).await?);
//! let ledger = Arc::new(LoyaltyLedger::new(Arc::clone(&pool), config.loyalty.clone()));
//!
//! let coordinator = DegradationCoordinator::with_default_cache();
//! coordinator.register_service(
//!     "loyalty-ledger",
//!     config.resilience.breaker_config_for("loyalty-ledger"),
//!     FallbackConfig::default(),
//!     None,
//! );
//! ```

pub mod config;
pub mod database;
pub mod degradation;
pub mod error;
pub mod loyalty;
pub mod resilience;

pub use config::{BreakerSettings, LoyaltyConfig, ResilienceSettings, RetailCoreConfig};
pub use database::{ConnectionPool, DatabasePoolConfig, PoolHealth, PoolStats};
pub use degradation::{
    DegradationCallback, DegradationCoordinator, DegradationLevel, FallbackCache, FallbackConfig,
    MemoryFallbackCache, MokaFallbackCache, ServiceHealth,
};
pub use error::{
    BoxError, DatabaseError, DegradationError, LoyaltyError, RetailError, RetailResult,
};
pub use loyalty::{
    AccrualOutcome, AccrualRequest, CompletedTransaction, LedgerEntry, LedgerEntryType,
    LoyaltyLedger, ReversalOutcome, ReversalRequest, SkipReason, TransactionStatus,
};
pub use resilience::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
