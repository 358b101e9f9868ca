//! Shared application state

use axum::extract::FromRef;
use sqlx::PgPool;
use std::sync::Arc;

use crate::admin::AdminService;
use crate::middleware::AuthConfig;
use crate::transaction::TransactionService;
use crate::transfer::{CollaboratorAccessPoller, TransferService};

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub transaction_service: Arc<TransactionService>,
    pub transfer_service: Arc<TransferService>,
    pub access_poller: Arc<CollaboratorAccessPoller>,
    pub admin_service: Arc<AdminService>,
    pub auth_config: AuthConfig,
}

impl FromRef<AppState> for AuthConfig {
    fn from_ref(state: &AppState) -> Self {
        state.auth_config.clone()
    }
}
