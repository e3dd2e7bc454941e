//! # Crate-Wide Error Types
//!
//! Domain errors for the resilience core, rolled up into [`RetailError`] for
//! callers that cross component boundaries. Each component keeps its own
//! thiserror enum so retryability can be judged at the layer that knows it:
//!
//! - [`DatabaseError`] — pool/query/transaction failures; the transaction is
//!   guaranteed rolled back before one of these propagates
//! - [`DegradationError`] — breaker rejections and exhausted fallback chains
//! - [`LoyaltyError`] — ledger lookups and accrual/reversal failures
//!
//! Ledger skip conditions (refunded, failed, flagged, loyalty disabled) are
//! *not* errors; they surface as successful no-op outcomes in
//! `loyalty::AccrualOutcome`.

use thiserror::Error;

/// Boxed error for wrapped operations whose concrete failure type the
/// coordinator does not care about.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Database-layer failures surfaced by the connection pool.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    #[error("transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("transaction timed out after {timeout_ms}ms")]
    TransactionTimeout { timeout_ms: u64 },

    #[error("unique constraint violated{}", constraint.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    UniqueViolation { constraint: Option<String> },
}

impl DatabaseError {
    /// Convert an sqlx error, distinguishing unique-constraint violations so
    /// idempotent writers can treat a duplicate insert as a no-op.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        if let Some(db_error) = error.as_database_error() {
            if db_error.is_unique_violation() {
                return Self::UniqueViolation {
                    constraint: db_error.constraint().map(str::to_string),
                };
            }
        }
        Self::Query(error)
    }

    /// Timeouts are retryable; everything else needs inspection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueryTimeout { .. } | Self::TransactionTimeout { .. }
        )
    }
}

/// Failures surfaced by `DegradationCoordinator::execute_with_degradation`.
#[derive(Debug, Error)]
pub enum DegradationError {
    /// The circuit breaker rejected the call without running the operation.
    /// Always retryable after the breaker's recovery timeout.
    #[error("circuit breaker open for '{service}'")]
    CircuitOpen { service: String },

    /// The wrapped operation itself failed. Retryability depends on the
    /// operation; the original error is preserved as the source.
    #[error("operation failed for '{service}': {source}")]
    Operation {
        service: String,
        #[source]
        source: BoxError,
    },

    /// Every fallback stage failed or was unavailable. Fatal to the calling
    /// request; maps to a 503-with-retry-hint at the HTTP boundary.
    #[error("all fallback stages exhausted for '{service}'")]
    Exhausted {
        service: String,
        #[source]
        source: Box<DegradationError>,
    },
}

impl DegradationError {
    /// Whether the caller can expect a later retry to succeed without
    /// operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::Exhausted { .. })
    }

    /// The dependency name this failure belongs to.
    pub fn service(&self) -> &str {
        match self {
            Self::CircuitOpen { service }
            | Self::Operation { service, .. }
            | Self::Exhausted { service, .. } => service,
        }
    }
}

/// Failures from the loyalty ledger.
#[derive(Debug, Error)]
pub enum LoyaltyError {
    #[error("loyalty member {member_id} not found")]
    MemberNotFound { member_id: i64 },

    #[error("customer {customer_id} has no loyalty membership")]
    NoMembership { customer_id: i64 },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Crate-level rollup for callers that cross component boundaries.
#[derive(Debug, Error)]
pub enum RetailError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Degradation(#[from] DegradationError),

    #[error(transparent)]
    Loyalty(#[from] LoyaltyError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type RetailResult<T> = Result<T, RetailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradation_error_retryability() {
        let open = DegradationError::CircuitOpen {
            service: "loyalty-ledger".to_string(),
        };
        assert!(open.is_retryable());

        let operation = DegradationError::Operation {
            service: "loyalty-ledger".to_string(),
            source: "boom".into(),
        };
        assert!(!operation.is_retryable());

        let exhausted = DegradationError::Exhausted {
            service: "loyalty-ledger".to_string(),
            source: Box::new(open),
        };
        assert!(exhausted.is_retryable());
        assert_eq!(exhausted.service(), "loyalty-ledger");
    }

    #[test]
    fn test_database_error_retryability() {
        assert!(DatabaseError::QueryTimeout { timeout_ms: 500 }.is_retryable());
        assert!(!DatabaseError::Transaction {
            reason: "deadlock".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_unique_violation_display_includes_constraint() {
        let err = DatabaseError::UniqueViolation {
            constraint: Some("loyalty_transactions_txn_type_idx".to_string()),
        };
        assert!(err.to_string().contains("loyalty_transactions_txn_type_idx"));
    }
}
