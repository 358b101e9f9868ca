//! Route definitions

mod admin;
mod transaction;
mod transfer;

use axum::{routing::get, Router};

use crate::handlers::health::health;
use crate::state::AppState;

/// Build the full application router
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest(
            "/api/transactions",
            transaction::router().merge(transfer::router()),
        )
        .nest("/api/admin/transactions", admin::router())
}
