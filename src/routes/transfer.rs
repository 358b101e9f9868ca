//! Repository transfer routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::transfer;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/transfer", get(transfer::get_transfer))
        .route("/:id/transfer/initiate", post(transfer::initiate_transfer))
        .route("/:id/transfer/username", post(transfer::set_github_username))
        .route("/:id/transfer/confirm", post(transfer::confirm_transfer))
        .route("/:id/transfer/ownership", post(transfer::transfer_ownership))
        .route("/:id/transfer/early-release", post(transfer::early_release))
        .route("/:id/transfer/access", get(transfer::check_access))
}
