//! Admin escrow operations
//!
//! Dispute handling, refunds and manual escrow release. Every action here is
//! recorded in the admin audit log with the acting admin, the reason and the
//! request IP.

mod service;

pub use service::{AdminActionRequest, AdminService, RefundOutcome};
