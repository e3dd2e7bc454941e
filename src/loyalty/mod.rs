//! # Loyalty Points
//!
//! Idempotent, fraud-aware accrual and reversal of customer loyalty points.
//! The ledger is append-only; the customer balance is a denormalized running
//! total updated atomically alongside each ledger insert.

pub mod eligibility;
pub mod ledger;
pub mod types;

pub use ledger::LoyaltyLedger;
pub use types::{
    AccrualOutcome, AccrualRequest, CompletedTransaction, LedgerEntry, LedgerEntryType,
    ReversalOutcome, ReversalRequest, SkipReason, TransactionStatus,
};
