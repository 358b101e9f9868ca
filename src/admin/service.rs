//! Admin escrow service
//!
//! Refunds, manual release and dispute state changes follow the same
//! lock-validate-commit discipline as the transfer state machine: one
//! database transaction per action, the transaction row locked with
//! `SELECT ... FOR UPDATE`, and the processor call made while the lock is
//! held so a failed refund never leaves the escrow marked refunded.

use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::notify::{Notifier, NotifyEvent};
use crate::payments::PaymentProcessor;
use crate::transaction::{EscrowStatus, PaymentStatus, Transaction};
use crate::transfer::service::lock_transaction;

/// Request body for audited admin actions
#[derive(Debug, serde::Deserialize, Validate)]
pub struct AdminActionRequest {
    #[validate(length(min = 10, message = "Reason must be at least 10 characters"))]
    pub reason: String,
}

/// Result of an admin refund
#[derive(Debug, serde::Serialize)]
pub struct RefundOutcome {
    pub transaction_id: Uuid,
    pub refund_id: String,
    pub refund_status: String,
    pub amount_cents: i64,
}

#[derive(Clone)]
pub struct AdminService {
    db_pool: PgPool,
    payment_processor: Arc<dyn PaymentProcessor>,
    notifier: Notifier,
}

impl AdminService {
    pub fn new(
        db_pool: PgPool,
        payment_processor: Arc<dyn PaymentProcessor>,
        notifier: Notifier,
    ) -> Self {
        Self {
            db_pool,
            payment_processor,
            notifier,
        }
    }

    /// Refund the buyer in full and close the escrow.
    ///
    /// Valid while escrow is `held` or `disputed`. The processor refund call
    /// runs inside the open database transaction; if it fails, no local state
    /// changes.
    pub async fn refund_transaction(
        &self,
        admin_id: Uuid,
        transaction_id: Uuid,
        request: &AdminActionRequest,
        ip_address: Option<String>,
    ) -> ApiResult<RefundOutcome> {
        request.validate()?;

        let mut db_tx = self.db_pool.begin().await?;

        let transaction = lock_transaction(&mut db_tx, transaction_id).await?;

        if transaction.payment_status != PaymentStatus::Succeeded {
            return Err(ApiError::ValidationError(
                "Only transactions with a captured payment can be refunded".to_string(),
            ));
        }

        if !matches!(
            transaction.escrow_status,
            EscrowStatus::Held | EscrowStatus::Disputed
        ) {
            return Err(ApiError::ValidationError(format!(
                "Escrow is {:?} and can no longer be refunded",
                transaction.escrow_status
            )));
        }

        let refund = self
            .payment_processor
            .refund(&transaction.payment_reference, None)
            .await?;

        sqlx::query(
            r#"
            UPDATE transactions
            SET payment_status = 'refunded',
                escrow_status = 'refunded',
                completed_at = COALESCE(completed_at, $1)
            WHERE id = $2
            "#,
        )
        .bind(Utc::now())
        .bind(transaction_id)
        .execute(&mut *db_tx)
        .await?;

        record_audit(
            &mut db_tx,
            admin_id,
            transaction_id,
            "refund_transaction",
            &request.reason,
            ip_address.as_deref(),
        )
        .await?;

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            admin_id = %admin_id,
            refund_id = %refund.id,
            "Transaction refunded"
        );

        self.notifier
            .notify(
                transaction.buyer_id,
                NotifyEvent::EscrowRefunded,
                json!({
                    "transaction_id": transaction_id,
                    "amount_cents": transaction.amount_cents,
                }),
            )
            .await;

        Ok(RefundOutcome {
            transaction_id,
            refund_id: refund.id,
            refund_status: refund.status,
            amount_cents: transaction.amount_cents,
        })
    }

    /// Release held escrow to the seller by admin decision.
    ///
    /// Used to resolve a dispute in the seller's favor or to unstick a
    /// transaction whose normal release path failed.
    pub async fn release_escrow_manually(
        &self,
        admin_id: Uuid,
        transaction_id: Uuid,
        request: &AdminActionRequest,
        ip_address: Option<String>,
    ) -> ApiResult<Transaction> {
        request.validate()?;

        let mut db_tx = self.db_pool.begin().await?;

        let transaction = lock_transaction(&mut db_tx, transaction_id).await?;

        if !matches!(
            transaction.escrow_status,
            EscrowStatus::Held | EscrowStatus::Disputed
        ) {
            return Err(ApiError::ValidationError(format!(
                "Escrow is {:?} and cannot be released",
                transaction.escrow_status
            )));
        }

        let now = Utc::now();
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET escrow_status = 'released',
                released_to_seller_at = $1,
                completed_at = COALESCE(completed_at, $1)
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(transaction_id)
        .fetch_one(&mut *db_tx)
        .await?;

        record_audit(
            &mut db_tx,
            admin_id,
            transaction_id,
            "release_escrow",
            &request.reason,
            ip_address.as_deref(),
        )
        .await?;

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            admin_id = %admin_id,
            "Escrow released manually"
        );

        self.notifier
            .notify(
                transaction.seller_id,
                NotifyEvent::EscrowReleased,
                json!({
                    "transaction_id": transaction_id,
                    "amount_cents": transaction.seller_receives_cents,
                }),
            )
            .await;

        Ok(transaction)
    }

    /// Freeze the escrow while a dispute is investigated.
    ///
    /// Only held funds can enter dispute; released or refunded funds have
    /// already moved.
    pub async fn mark_disputed(
        &self,
        admin_id: Uuid,
        transaction_id: Uuid,
        request: &AdminActionRequest,
        ip_address: Option<String>,
    ) -> ApiResult<Transaction> {
        request.validate()?;

        let mut db_tx = self.db_pool.begin().await?;

        let transaction = lock_transaction(&mut db_tx, transaction_id).await?;

        if transaction.escrow_status != EscrowStatus::Held {
            return Err(ApiError::ValidationError(format!(
                "Only held escrow can be disputed; escrow is {:?}",
                transaction.escrow_status
            )));
        }

        let transaction = sqlx::query_as::<_, Transaction>(
            "UPDATE transactions SET escrow_status = 'disputed' WHERE id = $1 RETURNING *",
        )
        .bind(transaction_id)
        .fetch_one(&mut *db_tx)
        .await?;

        record_audit(
            &mut db_tx,
            admin_id,
            transaction_id,
            "mark_disputed",
            &request.reason,
            ip_address.as_deref(),
        )
        .await?;

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            admin_id = %admin_id,
            "Escrow marked disputed"
        );

        for party in [transaction.buyer_id, transaction.seller_id] {
            self.notifier
                .notify(
                    party,
                    NotifyEvent::EscrowDisputed,
                    json!({ "transaction_id": transaction_id }),
                )
                .await;
        }

        Ok(transaction)
    }

    /// Return a disputed escrow to `held` without moving funds.
    ///
    /// Used when the dispute is resolved with no refund; the normal release
    /// path applies again afterwards.
    pub async fn resolve_dispute(
        &self,
        admin_id: Uuid,
        transaction_id: Uuid,
        request: &AdminActionRequest,
        ip_address: Option<String>,
    ) -> ApiResult<Transaction> {
        request.validate()?;

        let mut db_tx = self.db_pool.begin().await?;

        let transaction = lock_transaction(&mut db_tx, transaction_id).await?;

        if transaction.escrow_status != EscrowStatus::Disputed {
            return Err(ApiError::ValidationError(format!(
                "Escrow is {:?}, not disputed",
                transaction.escrow_status
            )));
        }

        let transaction = sqlx::query_as::<_, Transaction>(
            "UPDATE transactions SET escrow_status = 'held' WHERE id = $1 RETURNING *",
        )
        .bind(transaction_id)
        .fetch_one(&mut *db_tx)
        .await?;

        record_audit(
            &mut db_tx,
            admin_id,
            transaction_id,
            "resolve_dispute",
            &request.reason,
            ip_address.as_deref(),
        )
        .await?;

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            admin_id = %admin_id,
            "Dispute resolved; escrow returned to held"
        );

        Ok(transaction)
    }
}

async fn record_audit(
    db_tx: &mut sqlx::Transaction<'_, Postgres>,
    admin_id: Uuid,
    transaction_id: Uuid,
    action: &str,
    reason: &str,
    ip_address: Option<&str>,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO admin_audit_log (id, admin_id, transaction_id, action, reason, ip, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(admin_id)
    .bind(transaction_id)
    .bind(action)
    .bind(reason)
    .bind(ip_address)
    .bind(Utc::now())
    .execute(&mut **db_tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_length_enforced() {
        let short = AdminActionRequest {
            reason: "too short".to_string(),
        };
        assert!(short.validate().is_err());

        let ok = AdminActionRequest {
            reason: "Buyer reported the repository was empty".to_string(),
        };
        assert!(ok.validate().is_ok());
    }
}
