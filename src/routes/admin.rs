//! Admin routes

use axum::{routing::post, Router};

use crate::handlers::admin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/refund", post(admin::refund_transaction))
        .route("/:id/release-escrow", post(admin::release_escrow))
        .route("/:id/dispute", post(admin::mark_disputed))
        .route("/:id/resolve-dispute", post(admin::resolve_dispute))
}
