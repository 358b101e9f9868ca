//! Health check handler

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::db::check_health;
use crate::state::AppState;

/// Liveness and database connectivity check
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match check_health(&state.db_pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "ok" })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unreachable" })),
            )
        }
    }
}
