//! Agent session management module
//!
//! Runs the agent on a PTY and supervises its lifecycle: one session at a
//! time, replaced on restart.

mod session;
mod supervisor;

pub use session::*;
pub use supervisor::*;
