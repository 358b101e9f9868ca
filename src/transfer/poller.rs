//! Collaborator access poller
//!
//! Read-only reconciliation against the code-hosting provider: has the buyer
//! accepted the collaborator invitation? Advisory only: it never mutates
//! transfer state. The UI polls this on a fixed interval and decides whether
//! to call `confirm_transfer`; overlapping polls are harmless.

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::github::{parse_repo_url, CodeHost};
use crate::transfer::AccessCheckStatus;

#[derive(Clone)]
pub struct CollaboratorAccessPoller {
    db_pool: PgPool,
    code_host: Arc<dyn CodeHost>,
}

impl CollaboratorAccessPoller {
    pub fn new(db_pool: PgPool, code_host: Arc<dyn CodeHost>) -> Self {
        Self { db_pool, code_host }
    }

    /// Check whether the buyer now appears as an accepted collaborator.
    ///
    /// Caller must be the buyer or seller. Each "cannot verify" condition is
    /// a distinct status, not an error, so the polling loop can render it.
    pub async fn check_access(
        &self,
        caller_id: Uuid,
        transaction_id: Uuid,
    ) -> ApiResult<AccessCheckStatus> {
        let transaction = sqlx::query_as::<_, crate::transaction::Transaction>(
            "SELECT * FROM transactions WHERE id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Transaction {} not found", transaction_id)))?;

        transaction.ensure_party(caller_id)?;

        let transfer = sqlx::query_as::<_, crate::transfer::RepositoryTransfer>(
            "SELECT * FROM repository_transfers WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.db_pool)
        .await?;

        let (username, invitation_sent) = match &transfer {
            Some(t) => (
                t.buyer_github_username.clone(),
                t.invitation_sent_at.is_some(),
            ),
            None => (None, false),
        };

        let username = match username {
            Some(u) if invitation_sent => u,
            _ => return Ok(AccessCheckStatus::InvitationNotSent),
        };

        let token = sqlx::query_as::<_, (String,)>(
            "SELECT github_token FROM seller_credentials WHERE seller_id = $1",
        )
        .bind(transaction.seller_id)
        .fetch_optional(&self.db_pool)
        .await?;

        let token = match token {
            Some((t,)) => t,
            None => return Ok(AccessCheckStatus::SellerTokenMissing),
        };

        let repo = match transaction.repository_url.as_deref().and_then(parse_repo_url) {
            Some(repo) => repo,
            None => return Ok(AccessCheckStatus::InvalidGithubUrl),
        };

        // Presence in the collaborator list is the acceptance signal;
        // outstanding invitations are not listed.
        let accepted = self
            .code_host
            .check_collaborator_access(&repo, &username, &token)
            .await?;

        if accepted {
            Ok(AccessCheckStatus::Accepted)
        } else {
            Ok(AccessCheckStatus::Pending)
        }
    }
}
