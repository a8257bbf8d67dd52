//! Operator-facing bridge logic
//!
//! Parses inbound messages into events and dispatches them against the
//! session supervisor.

mod handler;
mod protocol;

pub use handler::*;
pub use protocol::*;
