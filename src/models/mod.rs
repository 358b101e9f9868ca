//! Shared data models for the Shipwright backend

use serde::{Deserialize, Serialize};

/// User roles carried in session tokens.
///
/// Buyer/seller is never trusted from the token for transaction operations;
/// services compare the caller id against the persisted party ids. Admin is
/// the only role gate enforced at the extractor level.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}
