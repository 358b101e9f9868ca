//! Repository transfer domain module
//!
//! Contains the transfer model, the state machine service and the
//! collaborator access poller.

mod model;
mod poller;
pub(crate) mod service;

pub use model::*;
pub use poller::CollaboratorAccessPoller;
pub use service::TransferService;
