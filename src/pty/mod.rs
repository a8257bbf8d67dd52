//! PTY management module
//!
//! Spawns the agent on a pseudo-terminal, writes its input and pumps its
//! output off the master side. Uses portable-pty for the terminal pair.

mod input;
mod process;
mod pump;

pub use input::*;
pub use process::*;
pub use pump::*;
