//! Repository transfer models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository transfer state machine states.
///
/// Transitions are monotonic along this order, except that `failed` is
/// reachable from any non-terminal state and the manual delivery method
/// bypasses the invitation/collaborator states.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "transfer_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    NotStarted,
    InvitationSent,
    CollaboratorAdded,
    OwnershipTransferred,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

/// How the code handover happens
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "transfer_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Automatic,
    Manual,
}

/// One code-hosting-repository handover, tied 1:1 to a transaction.
///
/// Created lazily on the first transfer-initiation call.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct RepositoryTransfer {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub status: TransferStatus,
    pub buyer_github_username: Option<String>,
    pub transfer_method: TransferMethod,
    /// Set when the seller initiates transfer intent, possibly before the
    /// buyer has supplied a username.
    pub seller_initiated_at: Option<DateTime<Utc>>,
    pub invitation_sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request DTO for the buyer supplying their GitHub username
#[derive(Debug, Deserialize)]
pub struct SetUsernameRequest {
    pub github_username: String,
}

/// Outcome of an ownership-transfer or early-release call.
///
/// Idempotent no-ops (already transferred) are success returns with a
/// `skipped` flag, not errors.
#[derive(Debug, Serialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub escrow_released: bool,
}

impl TransferOutcome {
    pub fn completed(escrow_released: bool) -> Self {
        Self {
            success: true,
            skipped: false,
            reason: None,
            escrow_released,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: true,
            reason: Some(reason.into()),
            escrow_released: false,
        }
    }
}

/// Advisory result of the collaborator access check
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessCheckStatus {
    /// Collaborator confirmed at the provider
    Accepted,
    /// Invitation outstanding
    Pending,
    /// No username or no invitation recorded yet
    InvitationNotSent,
    /// Seller's stored provider credential is absent
    SellerTokenMissing,
    /// The stored project URL does not parse as owner/repo
    InvalidGithubUrl,
}

/// Response body for the access-check endpoint
#[derive(Debug, Serialize)]
pub struct AccessCheckResponse {
    pub status: AccessCheckStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(!TransferStatus::NotStarted.is_terminal());
        assert!(!TransferStatus::InvitationSent.is_terminal());
        assert!(!TransferStatus::CollaboratorAdded.is_terminal());
        assert!(!TransferStatus::OwnershipTransferred.is_terminal());
    }

    #[test]
    fn test_outcome_shapes() {
        let done = TransferOutcome::completed(true);
        assert!(done.success);
        assert!(!done.skipped);
        assert!(done.escrow_released);

        let skipped = TransferOutcome::skipped("Repository ownership already transferred");
        assert!(!skipped.success);
        assert!(skipped.skipped);
        assert!(skipped.reason.is_some());
    }
}
