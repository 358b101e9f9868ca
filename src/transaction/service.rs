//! Transaction service layer - creation and escrow release policy
//!
//! The escrow release date is computed once here, at transaction-completion
//! time, and is immutable thereafter. Release itself only happens through the
//! transfer state machine (normal or early-release path), the admin override,
//! or the crash-recovery sweep in `sweep`, never purely by elapsed time.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::transaction::{
    CreateTransactionRequest, EscrowStatus, ListTransactionsQuery, PaymentStatus, Transaction,
};

/// Transaction service for the escrow lifecycle
#[derive(Clone)]
pub struct TransactionService {
    db_pool: PgPool,
    review_period_days: i64,
}

impl TransactionService {
    pub fn new(db_pool: PgPool, review_period_days: i64) -> Self {
        Self {
            db_pool,
            review_period_days,
        }
    }

    /// Record a transaction once the payment intent has succeeded.
    ///
    /// Computes the commission split and the escrow release date
    /// (`payment_succeeded_at + review period`), and opens escrow as `held`.
    pub async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
    ) -> ApiResult<Transaction> {
        request.validate().map_err(ApiError::ValidationError)?;

        let now = Utc::now();
        let escrow_release_at = now + Duration::days(self.review_period_days);

        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (
                id, listing_id, buyer_id, seller_id, amount_cents, commission_cents,
                seller_receives_cents, payment_status, escrow_status, escrow_release_at,
                code_delivery_status, payment_reference, repository_url, created_at,
                completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'succeeded', 'held', $8, 'pending',
                    $9, $10, $11, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.listing_id)
        .bind(request.buyer_id)
        .bind(request.seller_id)
        .bind(request.amount_cents)
        .bind(request.commission_cents)
        .bind(request.seller_receives_cents())
        .bind(escrow_release_at)
        .bind(&request.payment_reference)
        .bind(&request.repository_url)
        .bind(now)
        .fetch_one(&self.db_pool)
        .await?;

        tracing::info!(
            transaction_id = %transaction.id,
            amount_cents = transaction.amount_cents,
            escrow_release_at = %escrow_release_at,
            "Transaction recorded with escrow held"
        );

        Ok(transaction)
    }

    /// Get a single transaction by ID
    pub async fn get_transaction(&self, id: Uuid) -> ApiResult<Option<Transaction>> {
        let transaction =
            sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(transaction)
    }

    /// Get a transaction, requiring the caller to be buyer or seller
    pub async fn get_for_party(&self, id: Uuid, caller_id: Uuid) -> ApiResult<Transaction> {
        let transaction = self
            .get_transaction(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Transaction {} not found", id)))?;

        transaction.ensure_party(caller_id)?;

        Ok(transaction)
    }

    /// List the caller's transactions with filtering and pagination
    pub async fn list_for_party(
        &self,
        caller_id: Uuid,
        query: ListTransactionsQuery,
    ) -> ApiResult<Vec<Transaction>> {
        let page = i64::from(query.page.unwrap_or(1).max(1));
        let limit = i64::from(query.limit.unwrap_or(20).clamp(1, 100));
        let offset = (page - 1) * limit;

        let mut query_builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("SELECT * FROM transactions WHERE (buyer_id = ");
        query_builder.push_bind(caller_id);
        query_builder.push(" OR seller_id = ");
        query_builder.push_bind(caller_id);
        query_builder.push(")");

        if let Some(status) = query.escrow_status {
            query_builder.push(" AND escrow_status = ");
            query_builder.push_bind(status);
        }
        if let Some(status) = query.payment_status {
            query_builder.push(" AND payment_status = ");
            query_builder.push_bind(status);
        }

        query_builder.push(" ORDER BY created_at DESC LIMIT ");
        query_builder.push_bind(limit);
        query_builder.push(" OFFSET ");
        query_builder.push_bind(offset);

        let transactions = query_builder
            .build_query_as::<Transaction>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(transactions)
    }

    /// Crash recovery: release escrow for transactions whose ownership
    /// transfer already completed but whose escrow was left `held` past the
    /// release date (e.g. a crash between provider call and local commit).
    ///
    /// Returns the released transaction ids.
    pub async fn release_overdue_completed_transfers(&self) -> ApiResult<Vec<Uuid>> {
        let released = sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE transactions t
            SET escrow_status = 'released', released_to_seller_at = $1
            FROM repository_transfers rt
            WHERE rt.transaction_id = t.id
              AND rt.status = 'completed'
              AND t.escrow_status = 'held'
              AND t.escrow_release_at IS NOT NULL
              AND t.escrow_release_at < $1
            RETURNING t.id
            "#,
        )
        .bind(Utc::now())
        .fetch_all(&self.db_pool)
        .await?;

        Ok(released.into_iter().map(|(id,)| id).collect())
    }

    /// Detect transfers stuck at `ownership_transferred` with escrow still
    /// held past the grace period. Advisory only: the sweep alerts on these
    /// rather than silently releasing funds.
    pub async fn find_stuck_ownership_transfers(
        &self,
        grace_hours: i64,
    ) -> ApiResult<Vec<Uuid>> {
        let cutoff = Utc::now() - Duration::hours(grace_hours);

        let stuck = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT t.id
            FROM transactions t
            JOIN repository_transfers rt ON rt.transaction_id = t.id
            WHERE rt.status = 'ownership_transferred'
              AND t.escrow_status = 'held'
              AND rt.updated_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(stuck.into_iter().map(|(id,)| id).collect())
    }

    /// Reference check used by tests: no fund movement happened if the
    /// payment/escrow pair still reads (succeeded, held).
    pub fn funds_unmoved(transaction: &Transaction) -> bool {
        transaction.payment_status == PaymentStatus::Succeeded
            && transaction.escrow_status == EscrowStatus::Held
    }
}
