//! Transaction API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::AuthenticatedUser;
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::timeline::{build_timeline, TimelineStage};
use crate::transaction::{CreateTransactionRequest, ListTransactionsQuery, Transaction};

/// Record a transaction after payment capture
pub async fn create_transaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(mut request): Json<CreateTransactionRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Transaction>>)> {
    // Payment capture is reported by the buyer's checkout flow.
    request.buyer_id = user.user_id;

    let transaction = state.transaction_service.create_transaction(request).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(transaction))))
}

/// Get one transaction; caller must be a party
pub async fn get_transaction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Transaction>>> {
    let transaction = state
        .transaction_service
        .get_for_party(id, user.user_id)
        .await?;

    Ok(Json(ApiResponse::ok(transaction)))
}

/// List the caller's transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListTransactionsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Transaction>>>> {
    let transactions = state
        .transaction_service
        .list_for_party(user.user_id, query)
        .await?;

    Ok(Json(ApiResponse::ok(transactions)))
}

/// Derived timeline view for one transaction
pub async fn get_timeline(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<Vec<TimelineStage>>>> {
    let transaction = state
        .transaction_service
        .get_for_party(id, user.user_id)
        .await?;

    let transfer = state.transfer_service.get_transfer(id).await?;

    let timeline = build_timeline(&transaction, transfer.as_ref(), Utc::now());

    Ok(Json(ApiResponse::ok(timeline)))
}
