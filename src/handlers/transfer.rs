//! Repository transfer API handlers

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthenticatedUser;
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::transfer::{
    AccessCheckResponse, RepositoryTransfer, SetUsernameRequest, TransferOutcome,
};

/// Seller initiates the repository handover
pub async fn initiate_transfer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<RepositoryTransfer>>> {
    let transfer = state
        .transfer_service
        .initiate_transfer(user.user_id, transaction_id)
        .await?;

    Ok(Json(ApiResponse::ok(transfer)))
}

/// Buyer supplies their GitHub username
pub async fn set_github_username(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<SetUsernameRequest>,
) -> ApiResult<Json<ApiResponse<RepositoryTransfer>>> {
    let transfer = state
        .transfer_service
        .set_buyer_github_username(user.user_id, transaction_id, &request.github_username)
        .await?;

    Ok(Json(ApiResponse::ok(transfer)))
}

/// Buyer confirms they can access the repository
pub async fn confirm_transfer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<RepositoryTransfer>>> {
    let transfer = state
        .transfer_service
        .confirm_transfer(user.user_id, transaction_id)
        .await?;

    Ok(Json(ApiResponse::ok(transfer)))
}

/// Seller transfers repository ownership
pub async fn transfer_ownership(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<TransferOutcome>>> {
    let outcome = state
        .transfer_service
        .transfer_ownership(user.user_id, transaction_id)
        .await?;

    Ok(Json(ApiResponse::ok(outcome)))
}

/// Seller ends the review period early and releases escrow
pub async fn early_release(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<TransferOutcome>>> {
    let outcome = state
        .transfer_service
        .seller_early_release(user.user_id, transaction_id)
        .await?;

    Ok(Json(ApiResponse::ok(outcome)))
}

/// Check whether the buyer has accepted the collaborator invitation
pub async fn check_access(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<AccessCheckResponse>>> {
    let status = state
        .access_poller
        .check_access(user.user_id, transaction_id)
        .await?;

    Ok(Json(ApiResponse::ok(AccessCheckResponse { status })))
}

/// Get the transfer record for one transaction
pub async fn get_transfer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<RepositoryTransfer>>> {
    // Party check rides on the transaction read.
    state
        .transaction_service
        .get_for_party(transaction_id, user.user_id)
        .await?;

    let transfer = state
        .transfer_service
        .get_transfer(transaction_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound("No repository transfer for this transaction".to_string())
        })?;

    Ok(Json(ApiResponse::ok(transfer)))
}
