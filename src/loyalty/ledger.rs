//! # Loyalty Ledger
//!
//! Applies and reverses loyalty point balance changes exactly once per sale
//! transaction, with trailing-window fraud detection.
//!
//! Every balance mutation happens inside `ConnectionPool::run_in_transaction`
//! together with its append-only ledger row, so concurrent requests for one
//! customer serialize on the database row lock. Idempotency is enforced
//! twice: an existence check on the idempotency key inside the transaction
//! (fast path), and the unique index on `(transaction_id, entry_type)` as the
//! backstop for concurrent duplicate deliveries — a unique violation on the
//! insert maps back to the `Already*` outcome, never a double credit.

use std::sync::Arc;

use chrono::Utc;
use sqlx::Row;
use tracing::{info, warn};

use crate::config::LoyaltyConfig;
use crate::database::ConnectionPool;
use crate::error::{DatabaseError, LoyaltyError};
use crate::loyalty::eligibility;
use crate::loyalty::types::{
    AccrualOutcome, AccrualRequest, CompletedTransaction, LedgerEntry, LedgerEntryType,
    ReversalOutcome, ReversalRequest, SkipReason,
};

struct MemberRecord {
    customer_id: i64,
    loyalty_enabled: bool,
}

/// Transactional accrual/reversal logic for customer loyalty points.
pub struct LoyaltyLedger {
    pool: Arc<ConnectionPool>,
    config: LoyaltyConfig,
}

impl LoyaltyLedger {
    pub fn new(pool: Arc<ConnectionPool>, config: LoyaltyConfig) -> Self {
        Self { pool, config }
    }

    /// Run the eligibility gate for a completed sale, then accrue points for
    /// eligible transactions. The convenience entry point for the payment
    /// completion hook.
    pub async fn record_for_transaction(
        &self,
        completed: &CompletedTransaction,
        request: &AccrualRequest,
    ) -> Result<AccrualOutcome, LoyaltyError> {
        if let Some(reason) = eligibility::evaluate(completed) {
            return Ok(AccrualOutcome::Skipped { reason });
        }
        self.record_points_earned(request).await
    }

    /// Credit points for one sale, exactly once per `transaction_id`.
    ///
    /// Customers with loyalty disabled produce a skip outcome without any
    /// write. Accrual bursts above the fraud threshold within the trailing
    /// window log a warning but still proceed; detection, not blocking.
    pub async fn record_points_earned(
        &self,
        request: &AccrualRequest,
    ) -> Result<AccrualOutcome, LoyaltyError> {
        let member = self.lookup_member(request.member_id).await?;

        if !member.loyalty_enabled {
            info!(
                transaction_id = %request.transaction_id,
                member_id = request.member_id,
                reason = SkipReason::LoyaltyDisabled.as_str(),
                "Loyalty accrual skipped"
            );
            return Ok(AccrualOutcome::Skipped {
                reason: SkipReason::LoyaltyDisabled,
            });
        }

        let recent_entries = self.recent_entry_count(request.member_id).await?;
        if recent_entries >= i64::from(self.config.fraud_threshold) {
            warn!(
                member_id = request.member_id,
                transaction_id = %request.transaction_id,
                recent_entries,
                window_minutes = self.config.fraud_window_minutes,
                "Accrual rate exceeds fraud threshold; proceeding"
            );
        }

        let transaction_id = request.transaction_id;
        let member_id = request.member_id;
        let customer_id = member.customer_id;
        let points = request.points;
        let store_id = request.store_id;
        let recorded_by = request.recorded_by;

        let result = self
            .pool
            .run_in_transaction(move |tx| {
                Box::pin(async move {
                    let existing = sqlx::query(
                        "SELECT 1 FROM loyalty_transactions \
                         WHERE transaction_id = $1 AND entry_type = $2",
                    )
                    .bind(transaction_id)
                    .bind(LedgerEntryType::Earn.as_str())
                    .fetch_optional(&mut **tx)
                    .await?;
                    if existing.is_some() {
                        return Ok(AccrualOutcome::AlreadyRecorded);
                    }

                    // Ledger row first: the unique index catches concurrent
                    // duplicates before any balance change
                    sqlx::query(
                        "INSERT INTO loyalty_transactions \
                         (member_id, transaction_id, entry_type, points, store_id, recorded_by) \
                         VALUES ($1, $2, $3, $4, $5, $6)",
                    )
                    .bind(member_id)
                    .bind(transaction_id)
                    .bind(LedgerEntryType::Earn.as_str())
                    .bind(points)
                    .bind(store_id)
                    .bind(recorded_by)
                    .execute(&mut **tx)
                    .await
                    .map_err(DatabaseError::from_sqlx)?;

                    let new_balance: i64 = sqlx::query_scalar(
                        "UPDATE customers SET loyalty_balance = loyalty_balance + $1 \
                         WHERE id = $2 RETURNING loyalty_balance",
                    )
                    .bind(points)
                    .bind(customer_id)
                    .fetch_one(&mut **tx)
                    .await?;

                    Ok(AccrualOutcome::Recorded { new_balance })
                })
            })
            .await;

        match result {
            Ok(outcome) => {
                if let AccrualOutcome::Recorded { new_balance } = &outcome {
                    info!(
                        transaction_id = %transaction_id,
                        member_id,
                        points,
                        new_balance,
                        "Loyalty points earned"
                    );
                }
                Ok(outcome)
            }
            Err(DatabaseError::UniqueViolation { .. }) => {
                info!(
                    transaction_id = %transaction_id,
                    member_id,
                    "Duplicate accrual delivery; already recorded"
                );
                Ok(AccrualOutcome::AlreadyRecorded)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Claw back points for a refunded sale, exactly once per
    /// `transaction_id`. The balance is floored at zero, never negative.
    pub async fn reverse_loyalty_points(
        &self,
        request: &ReversalRequest,
    ) -> Result<ReversalOutcome, LoyaltyError> {
        let member_id = self.member_for_customer(request.customer_id).await?;

        let transaction_id = request.transaction_id;
        let customer_id = request.customer_id;
        let points = request.points;

        let result = self
            .pool
            .run_in_transaction(move |tx| {
                Box::pin(async move {
                    let existing = sqlx::query(
                        "SELECT 1 FROM loyalty_transactions \
                         WHERE transaction_id = $1 AND entry_type = $2",
                    )
                    .bind(transaction_id)
                    .bind(LedgerEntryType::Reverse.as_str())
                    .fetch_optional(&mut **tx)
                    .await?;
                    if existing.is_some() {
                        return Ok(ReversalOutcome::AlreadyReversed);
                    }

                    sqlx::query(
                        "INSERT INTO loyalty_transactions \
                         (member_id, transaction_id, entry_type, points) \
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(member_id)
                    .bind(transaction_id)
                    .bind(LedgerEntryType::Reverse.as_str())
                    .bind(points)
                    .execute(&mut **tx)
                    .await
                    .map_err(DatabaseError::from_sqlx)?;

                    let new_balance: i64 = sqlx::query_scalar(
                        "UPDATE customers \
                         SET loyalty_balance = GREATEST(loyalty_balance - $1, 0) \
                         WHERE id = $2 RETURNING loyalty_balance",
                    )
                    .bind(points)
                    .bind(customer_id)
                    .fetch_one(&mut **tx)
                    .await?;

                    Ok(ReversalOutcome::Reversed { new_balance })
                })
            })
            .await;

        match result {
            Ok(outcome) => {
                if let ReversalOutcome::Reversed { new_balance } = &outcome {
                    info!(
                        transaction_id = %transaction_id,
                        customer_id,
                        points,
                        new_balance,
                        "Loyalty points reversed"
                    );
                }
                Ok(outcome)
            }
            Err(DatabaseError::UniqueViolation { .. }) => {
                info!(
                    transaction_id = %transaction_id,
                    customer_id,
                    "Duplicate reversal delivery; already reversed"
                );
                Ok(ReversalOutcome::AlreadyReversed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent ledger entries for a member, newest first. Backs the
    /// member activity view at the POS and support tooling.
    pub async fn member_history(
        &self,
        member_id: i64,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>, LoyaltyError> {
        let rows = self
            .pool
            .fetch_all(
                sqlx::query(
                    "SELECT id, member_id, transaction_id, entry_type, points, store_id, \
                            created_at \
                     FROM loyalty_transactions \
                     WHERE member_id = $1 \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $2",
                )
                .bind(member_id)
                .bind(limit),
            )
            .await?;

        rows.into_iter()
            .map(|row| {
                let raw_type: String =
                    row.try_get("entry_type").map_err(DatabaseError::from)?;
                let entry_type = LedgerEntryType::from_db(&raw_type).ok_or_else(|| {
                    DatabaseError::Query(sqlx::Error::Decode(
                        format!("unknown ledger entry_type: {raw_type}").into(),
                    ))
                })?;
                Ok(LedgerEntry {
                    id: row.try_get("id").map_err(DatabaseError::from)?,
                    member_id: row.try_get("member_id").map_err(DatabaseError::from)?,
                    transaction_id: row
                        .try_get("transaction_id")
                        .map_err(DatabaseError::from)?,
                    entry_type,
                    points: row.try_get("points").map_err(DatabaseError::from)?,
                    store_id: row.try_get("store_id").map_err(DatabaseError::from)?,
                    created_at: row.try_get("created_at").map_err(DatabaseError::from)?,
                })
            })
            .collect()
    }

    async fn lookup_member(&self, member_id: i64) -> Result<MemberRecord, LoyaltyError> {
        let row = self
            .pool
            .fetch_optional(
                sqlx::query(
                    "SELECT lm.customer_id, c.loyalty_enabled \
                     FROM loyalty_members lm \
                     JOIN customers c ON c.id = lm.customer_id \
                     WHERE lm.id = $1",
                )
                .bind(member_id),
            )
            .await?;

        let Some(row) = row else {
            return Err(LoyaltyError::MemberNotFound { member_id });
        };
        Ok(MemberRecord {
            customer_id: row.try_get("customer_id").map_err(DatabaseError::from)?,
            loyalty_enabled: row.try_get("loyalty_enabled").map_err(DatabaseError::from)?,
        })
    }

    async fn member_for_customer(&self, customer_id: i64) -> Result<i64, LoyaltyError> {
        let row = self
            .pool
            .fetch_optional(
                sqlx::query("SELECT id FROM loyalty_members WHERE customer_id = $1").bind(customer_id),
            )
            .await?;

        let Some(row) = row else {
            return Err(LoyaltyError::NoMembership { customer_id });
        };
        Ok(row.try_get("id").map_err(DatabaseError::from)?)
    }

    /// Ledger entries this member committed within the trailing fraud window.
    async fn recent_entry_count(&self, member_id: i64) -> Result<i64, LoyaltyError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(self.config.fraud_window_minutes as i64);
        let row = self
            .pool
            .fetch_one(
                sqlx::query(
                    "SELECT COUNT(*) AS entries FROM loyalty_transactions \
                     WHERE member_id = $1 AND created_at > $2",
                )
                .bind(member_id)
                .bind(cutoff),
            )
            .await?;
        Ok(row.try_get("entries").map_err(DatabaseError::from)?)
    }
}
