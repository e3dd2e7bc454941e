//! # Accrual Eligibility Gate
//!
//! Decides whether a completed sale may accrue loyalty points at all. Callers
//! (the payment-completion hook) run this gate *before* invoking the ledger;
//! ineligible transactions are logged as explicit skips and never reach the
//! write path.

use tracing::info;

use crate::loyalty::types::{CompletedTransaction, SkipReason, TransactionStatus};

/// Evaluate whether `transaction` may accrue points.
///
/// Points accrue only when the transaction completed successfully and was
/// not flagged by fraud screening. Returns the skip reason otherwise; the
/// skip is logged here with the transaction id so accrual gaps are
/// explainable from the logs alone.
pub fn evaluate(transaction: &CompletedTransaction) -> Option<SkipReason> {
    let reason = match (transaction.status, transaction.flagged) {
        (TransactionStatus::Refunded, _) => Some(SkipReason::Refunded),
        (TransactionStatus::Failed, _) => Some(SkipReason::Failed),
        (TransactionStatus::Success, true) => Some(SkipReason::Flagged),
        (TransactionStatus::Success, false) => None,
    };

    if let Some(reason) = reason {
        info!(
            transaction_id = %transaction.transaction_id,
            reason = reason.as_str(),
            "Loyalty accrual skipped"
        );
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn transaction(status: TransactionStatus, flagged: bool) -> CompletedTransaction {
        CompletedTransaction {
            transaction_id: Uuid::new_v4(),
            status,
            flagged,
        }
    }

    #[test]
    fn test_successful_unflagged_transaction_is_eligible() {
        assert_eq!(evaluate(&transaction(TransactionStatus::Success, false)), None);
    }

    #[test]
    fn test_refunded_transaction_is_skipped() {
        assert_eq!(
            evaluate(&transaction(TransactionStatus::Refunded, false)),
            Some(SkipReason::Refunded)
        );
    }

    #[test]
    fn test_failed_transaction_is_skipped() {
        assert_eq!(
            evaluate(&transaction(TransactionStatus::Failed, false)),
            Some(SkipReason::Failed)
        );
    }

    #[test]
    fn test_flagged_transaction_is_skipped_even_on_success() {
        assert_eq!(
            evaluate(&transaction(TransactionStatus::Success, true)),
            Some(SkipReason::Flagged)
        );
    }

    #[test]
    fn test_flagged_refund_reports_refunded() {
        // Status takes precedence over the fraud flag in the skip reason
        assert_eq!(
            evaluate(&transaction(TransactionStatus::Refunded, true)),
            Some(SkipReason::Refunded)
        );
    }
}
