//! Shipwright backend
//!
//! Marketplace backend for buying and selling partially-completed software
//! projects. The core is the escrow and repository-transfer lifecycle:
//! payments are held in escrow while the buyer gets collaborator access to
//! the project repository, reviews the code, and receives full ownership.

pub mod admin;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod github;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod payments;
pub mod routes;
pub mod state;
pub mod sweep;
pub mod timeline;
pub mod transaction;
pub mod transfer;
