//! Authentication middleware
//!
//! Extractors that verify the session token and hand handlers the caller's
//! user id. Buyer/seller permission checks happen in the services against the
//! persisted party ids, never against a client-supplied role claim.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::{user_id_from_claims, verify_token};
use crate::models::UserRole;

/// JWT verification settings shared via app state
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Authenticated user extracted from the session token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

/// Error response for authentication failures
#[derive(Debug, Serialize)]
struct AuthError {
    error: AuthErrorDetails,
}

#[derive(Debug, Serialize)]
struct AuthErrorDetails {
    code: String,
    message: String,
}

impl AuthError {
    fn new(code: &str, message: &str) -> Self {
        Self {
            error: AuthErrorDetails {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(self)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AuthConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    AuthError::new(
                        "MISSING_TOKEN",
                        "Authorization header with Bearer token required",
                    )
                    .into_response()
                })?;

        let auth_config = AuthConfig::from_ref(state);

        let claims = verify_token(bearer.token(), &auth_config.jwt_secret).map_err(|e| {
            let (code, message) = match e.to_string().as_str() {
                s if s.contains("expired") => ("TOKEN_EXPIRED", "Token has expired"),
                _ => ("INVALID_TOKEN", "Invalid token"),
            };
            AuthError::new(code, message).into_response()
        })?;

        if claims.token_type != "access" {
            return Err(
                AuthError::new("INVALID_TOKEN_TYPE", "Expected access token").into_response(),
            );
        }

        let user_id = user_id_from_claims(&claims).map_err(|_| {
            AuthError::new("INVALID_TOKEN", "Invalid user ID in token").into_response()
        })?;

        let role = match claims.role.as_str() {
            "user" => UserRole::User,
            "admin" => UserRole::Admin,
            _ => {
                return Err(AuthError::new("INVALID_TOKEN", "Invalid role in token").into_response())
            }
        };

        Ok(AuthenticatedUser { user_id, role })
    }
}

/// Extractor that requires the admin role
pub struct AdminUser(pub AuthenticatedUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    AuthConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !matches!(user.role, UserRole::Admin) {
            return Err((
                StatusCode::FORBIDDEN,
                Json(AuthError::new("FORBIDDEN", "Admin access required")),
            )
                .into_response());
        }

        Ok(AdminUser(user))
    }
}
