//! Transaction routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::transaction;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(transaction::create_transaction).get(transaction::list_transactions),
        )
        .route("/:id", get(transaction::get_transaction))
        .route("/:id/timeline", get(transaction::get_timeline))
}
