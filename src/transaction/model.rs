//! Transaction models and data structures

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ApiError;

/// Payment status for a transaction
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

/// Escrow status for platform-held funds
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "escrow_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    Held,
    Released,
    Refunded,
    Disputed,
}

/// Delivery progress of the purchased code
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "code_delivery_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CodeDeliveryStatus {
    Pending,
    Delivered,
    Accessed,
}

/// One purchase of one listing by one buyer from one seller.
///
/// Financial record: rows are never physically deleted.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub amount_cents: i64,
    pub commission_cents: i64,
    pub seller_receives_cents: i64,
    pub payment_status: PaymentStatus,
    pub escrow_status: EscrowStatus,
    pub escrow_release_at: Option<DateTime<Utc>>,
    pub released_to_seller_at: Option<DateTime<Utc>>,
    pub code_delivery_status: CodeDeliveryStatus,
    pub payment_reference: String,
    /// Denormalized from the listing at purchase time; `None` means the
    /// listing does not use repository-based delivery.
    pub repository_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The party a caller plays in a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Buyer,
    Seller,
}

impl Transaction {
    /// Which party the caller is, if any. The single reusable guard the
    /// permission checks build on: roles are derived from the persisted
    /// party ids, never from a client-supplied claim.
    pub fn party_of(&self, caller_id: Uuid) -> Option<Party> {
        if caller_id == self.buyer_id {
            Some(Party::Buyer)
        } else if caller_id == self.seller_id {
            Some(Party::Seller)
        } else {
            None
        }
    }

    pub fn ensure_party(&self, caller_id: Uuid) -> Result<Party, ApiError> {
        self.party_of(caller_id).ok_or_else(|| {
            ApiError::Forbidden("Only the buyer or seller may access this transaction".to_string())
        })
    }

    pub fn ensure_buyer(&self, caller_id: Uuid) -> Result<(), ApiError> {
        match self.party_of(caller_id) {
            Some(Party::Buyer) => Ok(()),
            _ => Err(ApiError::Forbidden(
                "Only the buyer may perform this action".to_string(),
            )),
        }
    }

    pub fn ensure_seller(&self, caller_id: Uuid) -> Result<(), ApiError> {
        match self.party_of(caller_id) {
            Some(Party::Seller) => Ok(()),
            _ => Err(ApiError::Forbidden(
                "Only the seller may perform this action".to_string(),
            )),
        }
    }

    /// Whether the review period has elapsed as of `now`
    pub fn review_period_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.escrow_release_at {
            Some(release_at) => now >= release_at,
            None => false,
        }
    }
}

/// Request DTO for recording a transaction after payment capture
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub amount_cents: i64,
    pub commission_cents: i64,
    pub payment_reference: String,
    pub repository_url: Option<String>,
}

impl CreateTransactionRequest {
    /// Validate request invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.amount_cents <= 0 {
            return Err("Amount must be greater than 0".to_string());
        }
        if self.commission_cents < 0 {
            return Err("Commission must not be negative".to_string());
        }
        if self.commission_cents > self.amount_cents {
            return Err("Commission must not exceed the amount".to_string());
        }
        if self.buyer_id == self.seller_id {
            return Err("Buyer and seller must be different".to_string());
        }
        if self.payment_reference.trim().is_empty() {
            return Err("Payment reference is required".to_string());
        }
        Ok(())
    }

    /// Seller payout after commission
    pub fn seller_receives_cents(&self) -> i64 {
        self.amount_cents - self.commission_cents
    }
}

/// Query parameters for listing transactions
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub escrow_status: Option<EscrowStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}
