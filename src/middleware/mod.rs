//! HTTP middleware: authentication extractors, request tracing and
//! security headers.

mod auth;
mod security;
mod tracing;

pub use auth::{AdminUser, AuthConfig, AuthenticatedUser};
pub use security::security_headers;
pub use tracing::{client_ip, request_tracing};
