//! Transaction timeline derivation
//!
//! Derives the six-stage progress view from the transaction, the transfer
//! record and the wall clock. Nothing here is persisted: the timeline is
//! recomputed fresh on every request and must stay a pure function of its
//! inputs so it can be tested without a database.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::github::parse_repo_url;
use crate::transaction::{CodeDeliveryStatus, EscrowStatus, PaymentStatus, Transaction};
use crate::transfer::{RepositoryTransfer, TransferStatus};

/// Review period length in days; mirrors the escrow release offset.
pub const REVIEW_PERIOD_DAYS: i64 = 7;

/// Status of one timeline stage
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Upcoming,
    Active,
    Completed,
    Skipped,
    Failed,
}

/// How an action renders in the UI
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Primary,
    Secondary,
    Link,
}

/// One action available to the caller at a stage
#[derive(Debug, Serialize, Clone)]
pub struct StageAction {
    pub label: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl StageAction {
    fn api(label: &str, action_type: ActionType, method: &str, endpoint: String) -> Self {
        Self {
            label: label.to_string(),
            action_type,
            endpoint: Some(endpoint),
            method: Some(method.to_string()),
            href: None,
        }
    }

    fn link(label: &str, href: String) -> Self {
        Self {
            label: label.to_string(),
            action_type: ActionType::Link,
            endpoint: None,
            method: None,
            href: Some(href),
        }
    }
}

/// One derived stage of the transaction's progress
#[derive(Debug, Serialize, Clone)]
pub struct TimelineStage {
    pub name: String,
    pub status: StageStatus,
    pub description: String,
    pub actions: Vec<StageAction>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TimelineStage {
    fn new(name: &str, status: StageStatus, description: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            description: description.to_string(),
            actions: Vec::new(),
            metadata: Map::new(),
            completed_at: None,
        }
    }
}

/// Days remaining in the review window:
/// `max(0, review period - days elapsed since payment or invitation)`.
pub fn review_days_remaining(
    transaction: &Transaction,
    transfer: Option<&RepositoryTransfer>,
    now: DateTime<Utc>,
) -> i64 {
    let basis = transfer
        .and_then(|t| t.invitation_sent_at)
        .or(transaction.completed_at)
        .unwrap_or(transaction.created_at);

    let elapsed_days = (now - basis).num_days().max(0);
    (REVIEW_PERIOD_DAYS - elapsed_days).max(0)
}

/// Derive the full six-stage timeline.
pub fn build_timeline(
    transaction: &Transaction,
    transfer: Option<&RepositoryTransfer>,
    now: DateTime<Utc>,
) -> Vec<TimelineStage> {
    let uses_repository = transaction.repository_url.is_some();
    let payment_ok = transaction.payment_status == PaymentStatus::Succeeded;
    let transfer_failed = transfer.map(|t| t.status == TransferStatus::Failed).unwrap_or(false);
    let buyer_confirmed = transfer
        .map(|t| {
            matches!(
                t.status,
                TransferStatus::OwnershipTransferred | TransferStatus::Completed
            )
        })
        .unwrap_or(false);
    // Without repository delivery the access stage is skipped and the review
    // clock runs against the code-delivery window instead.
    let access_done = buyer_confirmed
        || (!uses_repository && transaction.code_delivery_status != CodeDeliveryStatus::Pending);
    let days_remaining = review_days_remaining(transaction, transfer, now);

    vec![
        offer_accepted_stage(transaction),
        payment_stage(transaction),
        collaborator_access_stage(transaction, transfer, uses_repository, payment_ok, transfer_failed),
        project_review_stage(transaction, payment_ok, access_done, days_remaining),
        trade_review_stage(transaction),
        ownership_transfer_stage(
            transaction,
            transfer,
            uses_repository,
            buyer_confirmed,
            transfer_failed,
            days_remaining,
        ),
    ]
}

fn offer_accepted_stage(transaction: &Transaction) -> TimelineStage {
    let mut stage = TimelineStage::new(
        "Offer Accepted",
        StageStatus::Completed,
        "The offer was accepted and the transaction was created",
    );
    stage.completed_at = Some(transaction.created_at);
    stage
}

fn payment_stage(transaction: &Transaction) -> TimelineStage {
    match transaction.payment_status {
        PaymentStatus::Succeeded | PaymentStatus::Refunded => {
            let mut stage = TimelineStage::new(
                "Payment Received",
                StageStatus::Completed,
                "Payment was captured and is held in escrow",
            );
            stage.completed_at = transaction.completed_at.or(Some(transaction.created_at));
            stage
        }
        PaymentStatus::Failed => TimelineStage::new(
            "Payment Received",
            StageStatus::Failed,
            "Payment failed",
        ),
        PaymentStatus::Pending => TimelineStage::new(
            "Payment Received",
            StageStatus::Active,
            "Awaiting payment confirmation",
        ),
    }
}

fn collaborator_access_stage(
    transaction: &Transaction,
    transfer: Option<&RepositoryTransfer>,
    uses_repository: bool,
    payment_ok: bool,
    transfer_failed: bool,
) -> TimelineStage {
    if !uses_repository {
        return TimelineStage::new(
            "Collaborator Access",
            StageStatus::Skipped,
            "This listing does not use repository-based delivery",
        );
    }

    if transfer_failed {
        return TimelineStage::new(
            "Collaborator Access",
            StageStatus::Failed,
            "The repository transfer failed",
        );
    }

    let mut stage = if !payment_ok {
        TimelineStage::new(
            "Collaborator Access",
            StageStatus::Upcoming,
            "The seller will invite you as a repository collaborator",
        )
    } else if transfer
        .map(|t| {
            matches!(
                t.status,
                TransferStatus::OwnershipTransferred | TransferStatus::Completed
            )
        })
        .unwrap_or(false)
    {
        TimelineStage::new(
            "Collaborator Access",
            StageStatus::Completed,
            "The buyer confirmed repository access",
        )
    } else {
        TimelineStage::new(
            "Collaborator Access",
            StageStatus::Active,
            "Waiting for the buyer to get collaborator access to the repository",
        )
    };

    if let Some(repo) = transaction.repository_url.as_deref().and_then(parse_repo_url) {
        stage
            .metadata
            .insert("repo_full_name".to_string(), json!(repo.full_name()));
    }

    let (username_known, invitation_sent) = transfer
        .map(|t| (t.buyer_github_username.is_some(), t.invitation_sent_at.is_some()))
        .unwrap_or((false, false));

    if let Some(t) = transfer {
        if let Some(username) = &t.buyer_github_username {
            stage
                .metadata
                .insert("buyer_github_username".to_string(), json!(username));
        }
        if let Some(sent_at) = t.invitation_sent_at {
            stage
                .metadata
                .insert("invitation_sent_at".to_string(), json!(sent_at));
        }
    }

    if stage.status == StageStatus::Active {
        let base = format!("/api/transactions/{}/transfer", transaction.id);
        if !username_known {
            stage.actions.push(StageAction::api(
                "Add your GitHub username",
                ActionType::Primary,
                "POST",
                format!("{}/username", base),
            ));
        } else if !invitation_sent {
            stage.actions.push(StageAction::api(
                "Send collaborator invitation",
                ActionType::Primary,
                "POST",
                format!("{}/initiate", base),
            ));
        } else {
            stage.actions.push(StageAction::api(
                "Confirm access",
                ActionType::Primary,
                "POST",
                format!("{}/confirm", base),
            ));
            stage.actions.push(StageAction::api(
                "Check invitation status",
                ActionType::Secondary,
                "GET",
                format!("{}/access", base),
            ));
        }
    }

    stage
}

fn project_review_stage(
    transaction: &Transaction,
    payment_ok: bool,
    review_open: bool,
    days_remaining: i64,
) -> TimelineStage {
    let mut stage = match transaction.escrow_status {
        EscrowStatus::Released => {
            let mut stage = TimelineStage::new(
                "Project Review",
                StageStatus::Completed,
                "The review period ended and funds were released",
            );
            stage.completed_at = transaction.released_to_seller_at;
            stage
        }
        EscrowStatus::Refunded => TimelineStage::new(
            "Project Review",
            StageStatus::Failed,
            "The transaction was refunded",
        ),
        EscrowStatus::Disputed => {
            let mut stage = TimelineStage::new(
                "Project Review",
                StageStatus::Active,
                "The transaction is under dispute review",
            );
            stage.metadata.insert("disputed".to_string(), json!(true));
            stage
        }
        EscrowStatus::Held => {
            if payment_ok && review_open {
                TimelineStage::new(
                    "Project Review",
                    StageStatus::Active,
                    "Inspect the delivered code before funds are released",
                )
            } else {
                TimelineStage::new(
                    "Project Review",
                    StageStatus::Upcoming,
                    "Review the project once you have access to the code",
                )
            }
        }
    };

    if transaction.escrow_status == EscrowStatus::Held {
        stage
            .metadata
            .insert("days_remaining".to_string(), json!(days_remaining));
        if let Some(release_at) = transaction.escrow_release_at {
            stage
                .metadata
                .insert("escrow_release_at".to_string(), json!(release_at));
        }
    }

    stage
}

fn trade_review_stage(transaction: &Transaction) -> TimelineStage {
    match transaction.escrow_status {
        EscrowStatus::Refunded => TimelineStage::new(
            "Trade Review",
            StageStatus::Skipped,
            "No trade review for refunded transactions",
        ),
        EscrowStatus::Released => {
            let mut stage = TimelineStage::new(
                "Trade Review",
                StageStatus::Active,
                "Share how the trade went",
            );
            stage.actions.push(StageAction::link(
                "Leave a review",
                format!("/transactions/{}/review", transaction.id),
            ));
            stage
        }
        _ => TimelineStage::new(
            "Trade Review",
            StageStatus::Upcoming,
            "Leave a review once the trade completes",
        ),
    }
}

fn ownership_transfer_stage(
    transaction: &Transaction,
    transfer: Option<&RepositoryTransfer>,
    uses_repository: bool,
    buyer_confirmed: bool,
    transfer_failed: bool,
    days_remaining: i64,
) -> TimelineStage {
    if !uses_repository {
        return TimelineStage::new(
            "Ownership Transfer",
            StageStatus::Skipped,
            "This listing does not use repository-based delivery",
        );
    }

    if transfer_failed {
        return TimelineStage::new(
            "Ownership Transfer",
            StageStatus::Failed,
            "The repository transfer failed",
        );
    }

    if transaction.escrow_status == EscrowStatus::Refunded {
        return TimelineStage::new(
            "Ownership Transfer",
            StageStatus::Skipped,
            "The transaction was refunded before ownership transfer",
        );
    }

    if let Some(t) = transfer {
        if t.status == TransferStatus::Completed {
            let mut stage = TimelineStage::new(
                "Ownership Transfer",
                StageStatus::Completed,
                "Repository ownership was transferred to the buyer",
            );
            stage.completed_at = t.completed_at;
            return stage;
        }
    }

    if buyer_confirmed || transaction.escrow_status == EscrowStatus::Released {
        let mut stage = TimelineStage::new(
            "Ownership Transfer",
            StageStatus::Active,
            "Transfer full repository ownership to the buyer",
        );
        let base = format!("/api/transactions/{}/transfer", transaction.id);
        stage.actions.push(StageAction::api(
            "Transfer repository ownership",
            ActionType::Primary,
            "POST",
            format!("{}/ownership", base),
        ));
        if transaction.escrow_status == EscrowStatus::Held && days_remaining > 0 {
            stage.actions.push(StageAction::api(
                "End review early and release funds",
                ActionType::Secondary,
                "POST",
                format!("{}/early-release", base),
            ));
        }
        return stage;
    }

    TimelineStage::new(
        "Ownership Transfer",
        StageStatus::Upcoming,
        "Ownership transfers after the review period",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferMethod;
    use chrono::Duration;
    use uuid::Uuid;

    fn base_transaction(now: DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            amount_cents: 100_000,
            commission_cents: 18_000,
            seller_receives_cents: 82_000,
            payment_status: PaymentStatus::Succeeded,
            escrow_status: EscrowStatus::Held,
            escrow_release_at: Some(now + Duration::days(REVIEW_PERIOD_DAYS)),
            released_to_seller_at: None,
            code_delivery_status: CodeDeliveryStatus::Pending,
            payment_reference: "pi_test_123".to_string(),
            repository_url: Some("https://github.com/octocat/hello-world".to_string()),
            created_at: now,
            completed_at: Some(now),
        }
    }

    fn base_transfer(transaction: &Transaction, now: DateTime<Utc>) -> RepositoryTransfer {
        RepositoryTransfer {
            id: Uuid::new_v4(),
            transaction_id: transaction.id,
            status: TransferStatus::NotStarted,
            buyer_github_username: None,
            transfer_method: TransferMethod::Automatic,
            seller_initiated_at: None,
            invitation_sent_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn stage<'a>(timeline: &'a [TimelineStage], name: &str) -> &'a TimelineStage {
        timeline.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn test_ordering_is_fixed() {
        let now = Utc::now();
        let tx = base_transaction(now);
        let timeline = build_timeline(&tx, None, now);

        let names: Vec<&str> = timeline.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Offer Accepted",
                "Payment Received",
                "Collaborator Access",
                "Project Review",
                "Trade Review",
                "Ownership Transfer",
            ]
        );
    }

    #[test]
    fn test_fresh_payment_success() {
        // Immediately after payment success: Payment Received completed,
        // Collaborator Access active, Project Review upcoming.
        let now = Utc::now();
        let tx = base_transaction(now);
        let timeline = build_timeline(&tx, None, now);

        assert_eq!(stage(&timeline, "Payment Received").status, StageStatus::Completed);
        assert_eq!(stage(&timeline, "Collaborator Access").status, StageStatus::Active);
        assert_eq!(stage(&timeline, "Project Review").status, StageStatus::Upcoming);
        assert_eq!(stage(&timeline, "Ownership Transfer").status, StageStatus::Upcoming);
    }

    #[test]
    fn test_collaborator_actions_progress_with_state() {
        let now = Utc::now();
        let tx = base_transaction(now);

        // No username yet: buyer is prompted for one.
        let transfer = base_transfer(&tx, now);
        let timeline = build_timeline(&tx, Some(&transfer), now);
        let access = stage(&timeline, "Collaborator Access");
        assert_eq!(access.actions[0].label, "Add your GitHub username");

        // Username known, invitation not yet out: seller sends the invite.
        let mut transfer = base_transfer(&tx, now);
        transfer.buyer_github_username = Some("octocat".to_string());
        let timeline = build_timeline(&tx, Some(&transfer), now);
        let access = stage(&timeline, "Collaborator Access");
        assert_eq!(access.actions[0].label, "Send collaborator invitation");

        // Invitation sent: buyer confirms, with a secondary poll action.
        let mut transfer = base_transfer(&tx, now);
        transfer.buyer_github_username = Some("octocat".to_string());
        transfer.status = TransferStatus::InvitationSent;
        transfer.invitation_sent_at = Some(now);
        let timeline = build_timeline(&tx, Some(&transfer), now);
        let access = stage(&timeline, "Collaborator Access");
        assert_eq!(access.actions[0].label, "Confirm access");
        assert_eq!(access.actions[1].action_type, ActionType::Secondary);
    }

    #[test]
    fn test_buyer_confirmation_opens_review() {
        let now = Utc::now();
        let tx = base_transaction(now);
        let mut transfer = base_transfer(&tx, now);
        transfer.status = TransferStatus::OwnershipTransferred;
        transfer.buyer_github_username = Some("octocat".to_string());
        transfer.invitation_sent_at = Some(now - Duration::days(1));

        let timeline = build_timeline(&tx, Some(&transfer), now);

        assert_eq!(stage(&timeline, "Collaborator Access").status, StageStatus::Completed);
        let review = stage(&timeline, "Project Review");
        assert_eq!(review.status, StageStatus::Active);
        assert_eq!(review.metadata["days_remaining"], json!(6));

        // Ownership transfer is now actionable by the seller, including the
        // early-release option while the review window is open.
        let ownership = stage(&timeline, "Ownership Transfer");
        assert_eq!(ownership.status, StageStatus::Active);
        assert_eq!(ownership.actions[0].label, "Transfer repository ownership");
        assert_eq!(ownership.actions[1].label, "End review early and release funds");
    }

    #[test]
    fn test_days_remaining_clamps_at_zero() {
        let now = Utc::now();
        let mut tx = base_transaction(now - Duration::days(10));
        tx.escrow_release_at = Some(now - Duration::days(3));

        assert_eq!(review_days_remaining(&tx, None, now), 0);

        // Escrow held past the nominal release date still renders as an
        // open review with zero days remaining: release is never automatic
        // by time alone.
        let timeline = build_timeline(&tx, None, now);
        let review = stage(&timeline, "Project Review");
        assert_eq!(review.metadata["days_remaining"], json!(0));
        assert_eq!(tx.escrow_status, EscrowStatus::Held);
    }

    #[test]
    fn test_days_remaining_uses_invitation_when_later() {
        let now = Utc::now();
        let tx = base_transaction(now - Duration::days(5));
        let mut transfer = base_transfer(&tx, now);
        transfer.invitation_sent_at = Some(now - Duration::days(2));

        assert_eq!(review_days_remaining(&tx, Some(&transfer), now), 5);
    }

    #[test]
    fn test_non_repository_listing_skips_stages() {
        let now = Utc::now();
        let mut tx = base_transaction(now);
        tx.repository_url = None;
        tx.code_delivery_status = CodeDeliveryStatus::Delivered;

        let timeline = build_timeline(&tx, None, now);

        assert_eq!(stage(&timeline, "Collaborator Access").status, StageStatus::Skipped);
        assert_eq!(stage(&timeline, "Ownership Transfer").status, StageStatus::Skipped);
        // Project Review still applies to the code-delivery window.
        assert_eq!(stage(&timeline, "Project Review").status, StageStatus::Active);
    }

    #[test]
    fn test_completed_transfer_and_release() {
        let now = Utc::now();
        let mut tx = base_transaction(now - Duration::days(8));
        tx.escrow_status = EscrowStatus::Released;
        tx.released_to_seller_at = Some(now);

        let mut transfer = base_transfer(&tx, now);
        transfer.status = TransferStatus::Completed;
        transfer.completed_at = Some(now);

        let timeline = build_timeline(&tx, Some(&transfer), now);

        assert_eq!(stage(&timeline, "Project Review").status, StageStatus::Completed);
        assert_eq!(stage(&timeline, "Ownership Transfer").status, StageStatus::Completed);
        let trade = stage(&timeline, "Trade Review");
        assert_eq!(trade.status, StageStatus::Active);
        assert_eq!(trade.actions[0].action_type, ActionType::Link);
    }

    #[test]
    fn test_refund_renders_failure_and_skips() {
        let now = Utc::now();
        let mut tx = base_transaction(now);
        tx.payment_status = PaymentStatus::Refunded;
        tx.escrow_status = EscrowStatus::Refunded;

        let timeline = build_timeline(&tx, None, now);

        assert_eq!(stage(&timeline, "Project Review").status, StageStatus::Failed);
        assert_eq!(stage(&timeline, "Trade Review").status, StageStatus::Skipped);
        assert_eq!(stage(&timeline, "Ownership Transfer").status, StageStatus::Skipped);
    }

    #[test]
    fn test_failed_transfer_marks_stages_failed() {
        let now = Utc::now();
        let tx = base_transaction(now);
        let mut transfer = base_transfer(&tx, now);
        transfer.status = TransferStatus::Failed;

        let timeline = build_timeline(&tx, Some(&transfer), now);

        assert_eq!(stage(&timeline, "Collaborator Access").status, StageStatus::Failed);
        assert_eq!(stage(&timeline, "Ownership Transfer").status, StageStatus::Failed);
    }

    #[test]
    fn test_disputed_escrow_flags_review() {
        let now = Utc::now();
        let mut tx = base_transaction(now);
        tx.escrow_status = EscrowStatus::Disputed;

        let timeline = build_timeline(&tx, None, now);
        let review = stage(&timeline, "Project Review");
        assert_eq!(review.status, StageStatus::Active);
        assert_eq!(review.metadata["disputed"], json!(true));
    }

    #[test]
    fn test_repo_metadata_present() {
        let now = Utc::now();
        let tx = base_transaction(now);
        let timeline = build_timeline(&tx, None, now);
        let access = stage(&timeline, "Collaborator Access");
        assert_eq!(access.metadata["repo_full_name"], json!("octocat/hello-world"));
    }
}
