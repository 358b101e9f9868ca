//! Admin API handlers
//!
//! All endpoints here require the admin role and an explanatory reason that
//! lands in the audit log together with the request IP.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use uuid::Uuid;

use crate::admin::{AdminActionRequest, RefundOutcome};
use crate::error::ApiResult;
use crate::middleware::{client_ip, AdminUser};
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::transaction::Transaction;

/// Refund the buyer and close the escrow
pub async fn refund_transaction(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(transaction_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AdminActionRequest>,
) -> ApiResult<Json<ApiResponse<RefundOutcome>>> {
    let outcome = state
        .admin_service
        .refund_transaction(admin.user_id, transaction_id, &request, client_ip(&headers))
        .await?;

    Ok(Json(ApiResponse::ok(outcome)))
}

/// Release held escrow to the seller by admin decision
pub async fn release_escrow(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(transaction_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AdminActionRequest>,
) -> ApiResult<Json<ApiResponse<Transaction>>> {
    let transaction = state
        .admin_service
        .release_escrow_manually(admin.user_id, transaction_id, &request, client_ip(&headers))
        .await?;

    Ok(Json(ApiResponse::ok(transaction)))
}

/// Freeze the escrow for dispute investigation
pub async fn mark_disputed(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(transaction_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AdminActionRequest>,
) -> ApiResult<Json<ApiResponse<Transaction>>> {
    let transaction = state
        .admin_service
        .mark_disputed(admin.user_id, transaction_id, &request, client_ip(&headers))
        .await?;

    Ok(Json(ApiResponse::ok(transaction)))
}

/// Return a disputed escrow to held
pub async fn resolve_dispute(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(transaction_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AdminActionRequest>,
) -> ApiResult<Json<ApiResponse<Transaction>>> {
    let transaction = state
        .admin_service
        .resolve_dispute(admin.user_id, transaction_id, &request, client_ip(&headers))
        .await?;

    Ok(Json(ApiResponse::ok(transaction)))
}
