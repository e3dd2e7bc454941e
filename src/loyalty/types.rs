//! Loyalty domain types: accrual/reversal requests, ledger entries, and the
//! skip/outcome vocabulary shared with callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final status of a completed sale transaction, as reported by the payment
/// completion hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Refunded,
    Failed,
}

/// A completed sale transaction presented to the accrual eligibility gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTransaction {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    /// Set by upstream fraud screening; flagged sales never accrue points
    pub flagged: bool,
}

/// Request to credit loyalty points for one sale.
///
/// `transaction_id` is the idempotency key: at most one `earn` ledger entry
/// is ever committed for it, no matter how often the request is delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualRequest {
    pub transaction_id: Uuid,
    pub store_id: i64,
    pub member_id: i64,
    pub points: i64,
    /// User who processed the sale
    pub recorded_by: i64,
}

/// Request to claw back points for a refunded sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversalRequest {
    pub transaction_id: Uuid,
    pub customer_id: i64,
    pub points: i64,
}

/// Ledger entry kind. The ledger is append-only; entries are never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryType {
    Earn,
    Reverse,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Reverse => "reverse",
        }
    }

    /// Parse the database representation back into the enum.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "earn" => Some(Self::Earn),
            "reverse" => Some(Self::Reverse),
            _ => None,
        }
    }
}

/// One committed row of the loyalty ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub member_id: i64,
    pub transaction_id: Uuid,
    pub entry_type: LedgerEntryType,
    pub points: i64,
    /// Store where the sale accrued; `None` for reversals
    pub store_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Why an accrual was skipped. Skips are successful no-op outcomes, logged
/// as informational, and invisible to the shopper beyond the absence of
/// points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Refunded,
    Failed,
    Flagged,
    LoyaltyDisabled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refunded => "refunded",
            Self::Failed => "failed",
            Self::Flagged => "flagged",
            Self::LoyaltyDisabled => "loyalty_disabled",
        }
    }
}

/// Result of an accrual request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccrualOutcome {
    /// Points were credited and a ledger row committed
    Recorded { new_balance: i64 },
    /// A ledger row for this transaction already exists; nothing was written
    AlreadyRecorded,
    /// The request never reached the write path
    Skipped { reason: SkipReason },
}

/// Result of a reversal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReversalOutcome {
    /// Points were debited (floored at zero) and a ledger row committed
    Reversed { new_balance: i64 },
    /// A reversal for this transaction already exists; nothing was written
    AlreadyReversed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_wire_names() {
        assert_eq!(SkipReason::Refunded.as_str(), "refunded");
        assert_eq!(SkipReason::LoyaltyDisabled.as_str(), "loyalty_disabled");
    }

    #[test]
    fn test_entry_type_db_round_trip() {
        assert_eq!(
            LedgerEntryType::from_db(LedgerEntryType::Earn.as_str()),
            Some(LedgerEntryType::Earn)
        );
        assert_eq!(
            LedgerEntryType::from_db(LedgerEntryType::Reverse.as_str()),
            Some(LedgerEntryType::Reverse)
        );
        assert_eq!(LedgerEntryType::from_db("adjust"), None);
    }

    #[test]
    fn test_transaction_status_serde_round_trip() {
        let json = serde_json::to_string(&TransactionStatus::Refunded).unwrap();
        assert_eq!(json, r#""refunded""#);
        let back: TransactionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TransactionStatus::Refunded);
    }

    #[test]
    fn test_accrual_outcome_serialization() {
        let outcome = AccrualOutcome::Recorded { new_balance: 150 };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "recorded");
        assert_eq!(json["new_balance"], 150);
    }
}
