//! Repository transfer state machine
//!
//! Owns the transitions between collaborator-invitation, review-period and
//! ownership-transfer states. Every mutating operation opens one database
//! transaction, locks the transaction row with `SELECT ... FOR UPDATE`,
//! re-reads current state under the lock, validates preconditions, and
//! commits the full transition or nothing. Provider calls happen while the
//! transaction is open: a provider failure aborts the local transition, so
//! there is never an optimistic "assume it worked" update. The paired
//! ownership-transfer + escrow-release writes commit together or not at all.

use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::github::{parse_repo_url, CodeHost, RepoRef};
use crate::notify::{Notifier, NotifyEvent};
use crate::transaction::{EscrowStatus, PaymentStatus, Transaction};
use crate::transfer::{
    RepositoryTransfer, TransferMethod, TransferOutcome, TransferStatus,
};

/// Transfer service driving the repository handover lifecycle
#[derive(Clone)]
pub struct TransferService {
    db_pool: PgPool,
    code_host: Arc<dyn CodeHost>,
    notifier: Notifier,
}

impl TransferService {
    pub fn new(db_pool: PgPool, code_host: Arc<dyn CodeHost>, notifier: Notifier) -> Self {
        Self {
            db_pool,
            code_host,
            notifier,
        }
    }

    /// Seller initiates the repository handover.
    ///
    /// Creates the transfer record if absent. If the buyer's GitHub username
    /// is already known, sends the collaborator invitation and moves to
    /// `invitation_sent`; otherwise records seller intent and stays at
    /// `not_started` until the buyer supplies a username. Manual-method
    /// transfers skip the invitation entirely and just mark the code
    /// delivered. Re-initiating an already-initiated transfer returns the
    /// existing record unchanged.
    pub async fn initiate_transfer(
        &self,
        caller_id: Uuid,
        transaction_id: Uuid,
    ) -> ApiResult<RepositoryTransfer> {
        let mut db_tx = self.db_pool.begin().await?;

        let transaction = lock_transaction(&mut db_tx, transaction_id).await?;
        transaction.ensure_seller(caller_id)?;

        if transaction.payment_status != PaymentStatus::Succeeded {
            return Err(ApiError::ValidationError(
                "Payment has not succeeded for this transaction".to_string(),
            ));
        }

        let transfer = get_or_create_transfer(&mut db_tx, &transaction).await?;

        // Idempotent retry from a flaky UI action: no duplicate invitation.
        if transfer.status != TransferStatus::NotStarted {
            db_tx.commit().await?;
            return Ok(transfer);
        }

        // Manual delivery happens out-of-band; record intent, mark the code
        // delivered and skip the invitation/collaborator states entirely.
        if transfer.transfer_method == TransferMethod::Manual {
            let transfer = sqlx::query_as::<_, RepositoryTransfer>(
                r#"
                UPDATE repository_transfers
                SET seller_initiated_at = COALESCE(seller_initiated_at, $1), updated_at = $1
                WHERE id = $2
                RETURNING *
                "#,
            )
            .bind(Utc::now())
            .bind(transfer.id)
            .fetch_one(&mut *db_tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE transactions
                SET code_delivery_status = 'delivered'
                WHERE id = $1 AND code_delivery_status = 'pending'
                "#,
            )
            .bind(transaction_id)
            .execute(&mut *db_tx)
            .await?;

            db_tx.commit().await?;

            tracing::info!(
                transaction_id = %transaction_id,
                "Manual delivery marked"
            );

            return Ok(transfer);
        }

        let buyer_username = match transfer.buyer_github_username.clone() {
            Some(username) => username,
            None => {
                // Record intent; the buyer's action surface now prompts for
                // their username, which triggers the invitation on save.
                let transfer = sqlx::query_as::<_, RepositoryTransfer>(
                    r#"
                    UPDATE repository_transfers
                    SET seller_initiated_at = COALESCE(seller_initiated_at, $1), updated_at = $1
                    WHERE id = $2
                    RETURNING *
                    "#,
                )
                .bind(Utc::now())
                .bind(transfer.id)
                .fetch_one(&mut *db_tx)
                .await?;

                db_tx.commit().await?;

                tracing::info!(
                    transaction_id = %transaction_id,
                    "Transfer initiated; awaiting buyer GitHub username"
                );

                return Ok(transfer);
            }
        };

        let transfer = self
            .send_invitation(&mut db_tx, &transaction, &transfer, &buyer_username)
            .await?;

        db_tx.commit().await?;

        self.notifier
            .notify(
                transaction.buyer_id,
                NotifyEvent::CollaboratorInviteSent,
                json!({ "transaction_id": transaction_id }),
            )
            .await;

        Ok(transfer)
    }

    /// Buyer supplies their GitHub username.
    ///
    /// If the seller has already initiated transfer intent, the invitation
    /// goes out immediately and the transfer moves to `invitation_sent`.
    /// After that the username is fixed; resubmitting the same value is a
    /// no-op.
    pub async fn set_buyer_github_username(
        &self,
        caller_id: Uuid,
        transaction_id: Uuid,
        username: &str,
    ) -> ApiResult<RepositoryTransfer> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ApiError::ValidationError(
                "GitHub username must not be empty".to_string(),
            ));
        }

        let mut db_tx = self.db_pool.begin().await?;

        let transaction = lock_transaction(&mut db_tx, transaction_id).await?;
        transaction.ensure_buyer(caller_id)?;

        let transfer = get_or_create_transfer(&mut db_tx, &transaction).await?;

        // Once the invitation is out it names a specific account; a silent
        // rename would leave the access check polling a username that was
        // never invited.
        if transfer.status != TransferStatus::NotStarted {
            if transfer.buyer_github_username.as_deref() == Some(username) {
                db_tx.commit().await?;
                return Ok(transfer);
            }
            return Err(ApiError::ValidationError(
                "GitHub username cannot be changed after the invitation was sent".to_string(),
            ));
        }

        let transfer = sqlx::query_as::<_, RepositoryTransfer>(
            r#"
            UPDATE repository_transfers
            SET buyer_github_username = $1, updated_at = $2
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(Utc::now())
        .bind(transfer.id)
        .fetch_one(&mut *db_tx)
        .await?;

        let seller_already_initiated = transfer.seller_initiated_at.is_some()
            && transfer.status == TransferStatus::NotStarted
            && transfer.transfer_method == TransferMethod::Automatic;

        let transfer = if seller_already_initiated {
            let transfer = self
                .send_invitation(&mut db_tx, &transaction, &transfer, username)
                .await?;

            db_tx.commit().await?;

            self.notifier
                .notify(
                    transaction.buyer_id,
                    NotifyEvent::CollaboratorInviteSent,
                    json!({ "transaction_id": transaction_id }),
                )
                .await;

            transfer
        } else {
            db_tx.commit().await?;
            transfer
        };

        Ok(transfer)
    }

    /// Buyer confirms they can access the repository.
    ///
    /// Models buyer-confirmed access; escrow release is a separate concern
    /// handled by `transfer_ownership` / `seller_early_release`.
    pub async fn confirm_transfer(
        &self,
        caller_id: Uuid,
        transaction_id: Uuid,
    ) -> ApiResult<RepositoryTransfer> {
        let mut db_tx = self.db_pool.begin().await?;

        let transaction = lock_transaction(&mut db_tx, transaction_id).await?;
        transaction.ensure_buyer(caller_id)?;

        let transfer = lock_transfer(&mut db_tx, transaction_id)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound("No repository transfer for this transaction".to_string())
            })?;

        if !matches!(
            transfer.status,
            TransferStatus::InvitationSent | TransferStatus::CollaboratorAdded
        ) {
            return Err(ApiError::ValidationError(
                "Access can only be confirmed after a collaborator invitation was sent"
                    .to_string(),
            ));
        }

        let transfer = sqlx::query_as::<_, RepositoryTransfer>(
            r#"
            UPDATE repository_transfers
            SET status = 'ownership_transferred', updated_at = $1
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(transfer.id)
        .fetch_one(&mut *db_tx)
        .await?;

        sqlx::query("UPDATE transactions SET code_delivery_status = 'accessed' WHERE id = $1")
            .bind(transaction_id)
            .execute(&mut *db_tx)
            .await?;

        db_tx.commit().await?;

        self.notifier
            .notify(
                transaction.seller_id,
                NotifyEvent::BuyerConfirmedAccess,
                json!({ "transaction_id": transaction_id }),
            )
            .await;

        Ok(transfer)
    }

    /// Seller transfers repository ownership.
    ///
    /// Before the review period elapses, ownership moves but escrow stays
    /// held until the period expires naturally. After the period, ownership
    /// transfer and escrow release commit atomically. Already-transferred is
    /// an idempotent no-op with a `skipped` flag.
    pub async fn transfer_ownership(
        &self,
        caller_id: Uuid,
        transaction_id: Uuid,
    ) -> ApiResult<TransferOutcome> {
        self.complete_transfer(caller_id, transaction_id, false).await
    }

    /// Seller ends the review period immediately.
    ///
    /// Performs the atomic ownership-transfer + escrow-release regardless of
    /// elapsed time. Irrevocable: the stored escrow release date is not
    /// altered, but once funds move the normal dispute window is gone.
    pub async fn seller_early_release(
        &self,
        caller_id: Uuid,
        transaction_id: Uuid,
    ) -> ApiResult<TransferOutcome> {
        self.complete_transfer(caller_id, transaction_id, true).await
    }

    /// Plain read of the transfer record, for timeline derivation
    pub async fn get_transfer(
        &self,
        transaction_id: Uuid,
    ) -> ApiResult<Option<RepositoryTransfer>> {
        let transfer = sqlx::query_as::<_, RepositoryTransfer>(
            "SELECT * FROM repository_transfers WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(transfer)
    }

    async fn complete_transfer(
        &self,
        caller_id: Uuid,
        transaction_id: Uuid,
        force_release: bool,
    ) -> ApiResult<TransferOutcome> {
        let mut db_tx = self.db_pool.begin().await?;

        let transaction = lock_transaction(&mut db_tx, transaction_id).await?;
        transaction.ensure_seller(caller_id)?;

        let transfer = lock_transfer(&mut db_tx, transaction_id)
            .await?
            .ok_or_else(|| {
                ApiError::ValidationError("Transfer has not been initiated".to_string())
            })?;

        match transaction.escrow_status {
            EscrowStatus::Held => {}
            EscrowStatus::Released if transfer.status == TransferStatus::Completed => {
                return Ok(TransferOutcome::skipped(
                    "Repository ownership already transferred",
                ));
            }
            EscrowStatus::Released => {}
            EscrowStatus::Disputed => {
                return Err(ApiError::ValidationError(
                    "Escrow is under dispute; ownership transfer is blocked".to_string(),
                ));
            }
            EscrowStatus::Refunded => {
                return Err(ApiError::ValidationError(
                    "Transaction was refunded; ownership transfer is blocked".to_string(),
                ));
            }
        }

        if transfer.status == TransferStatus::Failed {
            return Err(ApiError::ValidationError(
                "Transfer previously failed and cannot be completed".to_string(),
            ));
        }

        let now = Utc::now();

        if transfer.status == TransferStatus::Completed {
            // Ownership already moved. An early release can still move the
            // funds if the escrow is held from a pre-review transfer.
            if force_release && transaction.escrow_status == EscrowStatus::Held {
                release_escrow(&mut db_tx, transaction_id).await?;
                db_tx.commit().await?;

                self.notify_released(&transaction).await;
                return Ok(TransferOutcome::completed(true));
            }

            return Ok(TransferOutcome::skipped(
                "Repository ownership already transferred",
            ));
        }

        // The actual provider handover. Manual-method transfers were handed
        // over out-of-band by the seller, so there is nothing to call.
        if transfer.transfer_method == TransferMethod::Automatic {
            let repo = repo_ref(&transaction)?;
            let buyer_username = transfer.buyer_github_username.as_deref().ok_or_else(|| {
                ApiError::ValidationError("Buyer GitHub username is not set".to_string())
            })?;
            let token = seller_token(&mut db_tx, transaction.seller_id)
                .await?
                .ok_or_else(|| {
                    ApiError::ValidationError(
                        "Seller has not connected a GitHub access token".to_string(),
                    )
                })?;

            self.code_host
                .transfer_repository_ownership(&repo, buyer_username, &token)
                .await?;
        }

        sqlx::query(
            r#"
            UPDATE repository_transfers
            SET status = 'completed', completed_at = $1, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(now)
        .bind(transfer.id)
        .execute(&mut *db_tx)
        .await?;

        let release_now = transaction.escrow_status == EscrowStatus::Held
            && (force_release || transaction.review_period_elapsed(now));

        if release_now {
            release_escrow(&mut db_tx, transaction_id).await?;
        }

        db_tx.commit().await?;

        tracing::info!(
            transaction_id = %transaction_id,
            escrow_released = release_now,
            "Repository ownership transferred"
        );

        self.notifier
            .notify(
                transaction.buyer_id,
                NotifyEvent::OwnershipTransferred,
                json!({ "transaction_id": transaction_id }),
            )
            .await;

        if release_now {
            self.notify_released(&transaction).await;
        }

        Ok(TransferOutcome::completed(release_now))
    }

    /// Send the collaborator invitation and advance to `invitation_sent`.
    ///
    /// Runs inside the caller's open database transaction; a provider
    /// failure propagates and rolls the whole transition back, so there is
    /// no partial invite.
    async fn send_invitation(
        &self,
        db_tx: &mut sqlx::Transaction<'_, Postgres>,
        transaction: &Transaction,
        transfer: &RepositoryTransfer,
        buyer_username: &str,
    ) -> ApiResult<RepositoryTransfer> {
        let repo = repo_ref(transaction)?;
        let token = seller_token(db_tx, transaction.seller_id)
            .await?
            .ok_or_else(|| {
                ApiError::ValidationError(
                    "Seller has not connected a GitHub access token".to_string(),
                )
            })?;

        self.code_host
            .send_collaborator_invite(&repo, buyer_username, &token)
            .await?;

        let now = Utc::now();
        let transfer = sqlx::query_as::<_, RepositoryTransfer>(
            r#"
            UPDATE repository_transfers
            SET status = 'invitation_sent',
                seller_initiated_at = COALESCE(seller_initiated_at, $1),
                invitation_sent_at = $1,
                updated_at = $1
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(transfer.id)
        .fetch_one(&mut **db_tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE transactions
            SET code_delivery_status = 'delivered'
            WHERE id = $1 AND code_delivery_status = 'pending'
            "#,
        )
        .bind(transaction.id)
        .execute(&mut **db_tx)
        .await?;

        tracing::info!(
            transaction_id = %transaction.id,
            repo = %repo.full_name(),
            "Collaborator invitation sent"
        );

        Ok(transfer)
    }

    async fn notify_released(&self, transaction: &Transaction) {
        self.notifier
            .notify(
                transaction.seller_id,
                NotifyEvent::EscrowReleased,
                json!({
                    "transaction_id": transaction.id,
                    "amount_cents": transaction.seller_receives_cents,
                }),
            )
            .await;
    }
}

/// Lock the transaction row for the duration of one transition
pub(crate) async fn lock_transaction(
    db_tx: &mut sqlx::Transaction<'_, Postgres>,
    transaction_id: Uuid,
) -> ApiResult<Transaction> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
        .bind(transaction_id)
        .fetch_optional(&mut **db_tx)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Transaction {} not found", transaction_id)))
}

pub(crate) async fn lock_transfer(
    db_tx: &mut sqlx::Transaction<'_, Postgres>,
    transaction_id: Uuid,
) -> ApiResult<Option<RepositoryTransfer>> {
    let transfer = sqlx::query_as::<_, RepositoryTransfer>(
        "SELECT * FROM repository_transfers WHERE transaction_id = $1 FOR UPDATE",
    )
    .bind(transaction_id)
    .fetch_optional(&mut **db_tx)
    .await?;

    Ok(transfer)
}

/// Create the transfer row lazily, or return the locked existing one.
///
/// The method is automatic when the listing carries a repository URL,
/// manual otherwise.
async fn get_or_create_transfer(
    db_tx: &mut sqlx::Transaction<'_, Postgres>,
    transaction: &Transaction,
) -> ApiResult<RepositoryTransfer> {
    if let Some(existing) = lock_transfer(db_tx, transaction.id).await? {
        return Ok(existing);
    }

    let method = if transaction.repository_url.is_some() {
        TransferMethod::Automatic
    } else {
        TransferMethod::Manual
    };

    let transfer = sqlx::query_as::<_, RepositoryTransfer>(
        r#"
        INSERT INTO repository_transfers (id, transaction_id, status, transfer_method, created_at, updated_at)
        VALUES ($1, $2, 'not_started', $3, $4, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(transaction.id)
    .bind(method)
    .bind(Utc::now())
    .fetch_one(&mut **db_tx)
    .await?;

    Ok(transfer)
}

/// Seller's provider credential, fetched just-in-time and never logged
pub(crate) async fn seller_token(
    db_tx: &mut sqlx::Transaction<'_, Postgres>,
    seller_id: Uuid,
) -> ApiResult<Option<String>> {
    let token = sqlx::query_as::<_, (String,)>(
        "SELECT github_token FROM seller_credentials WHERE seller_id = $1",
    )
    .bind(seller_id)
    .fetch_optional(&mut **db_tx)
    .await?;

    Ok(token.map(|(t,)| t))
}

pub(crate) fn repo_ref(transaction: &Transaction) -> ApiResult<RepoRef> {
    let url = transaction.repository_url.as_deref().ok_or_else(|| {
        ApiError::ValidationError("This listing does not use repository-based delivery".to_string())
    })?;

    parse_repo_url(url).ok_or_else(|| {
        ApiError::ValidationError("The stored repository URL is not a valid owner/repo URL".to_string())
    })
}

async fn release_escrow(
    db_tx: &mut sqlx::Transaction<'_, Postgres>,
    transaction_id: Uuid,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        UPDATE transactions
        SET escrow_status = 'released',
            released_to_seller_at = $1,
            completed_at = COALESCE(completed_at, $1)
        WHERE id = $2 AND escrow_status = 'held'
        "#,
    )
    .bind(Utc::now())
    .bind(transaction_id)
    .execute(&mut **db_tx)
    .await?;

    Ok(())
}
