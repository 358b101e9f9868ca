//! Transaction domain module
//!
//! Contains the transaction model, creation invariants and the escrow
//! release policy.

mod model;
mod service;

pub use model::*;
pub use service::TransactionService;
