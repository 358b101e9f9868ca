//! Notification sink
//!
//! Fire-and-forget from the state machine's perspective: a notify failure is
//! logged and never rolls back a state transition.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Notification event types emitted by the transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    CollaboratorInviteSent,
    BuyerConfirmedAccess,
    OwnershipTransferred,
    EscrowReleased,
    EscrowRefunded,
    EscrowDisputed,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyEvent::CollaboratorInviteSent => "collaborator_invite_sent",
            NotifyEvent::BuyerConfirmedAccess => "buyer_confirmed_access",
            NotifyEvent::OwnershipTransferred => "ownership_transferred",
            NotifyEvent::EscrowReleased => "escrow_released",
            NotifyEvent::EscrowRefunded => "escrow_refunded",
            NotifyEvent::EscrowDisputed => "escrow_disputed",
        }
    }
}

/// Queues notifications for delivery by the notification worker.
///
/// Rows go into a delivery queue table; the worker that drains it lives in
/// the notifications service, outside this backend.
#[derive(Clone)]
pub struct Notifier {
    db_pool: PgPool,
}

impl Notifier {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Queue a notification. Errors are logged, never propagated.
    pub async fn notify(&self, user_id: Uuid, event: NotifyEvent, payload: Value) {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_queue (id, user_id, event_type, payload, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(event.as_str())
        .bind(payload)
        .execute(&self.db_pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                user_id = %user_id,
                event = event.as_str(),
                error = %e,
                "Failed to queue notification"
            );
        }
    }
}
