//! Configuration module
//!
//! Loads the bridge configuration from defaults, an optional TOML file and
//! the environment.

mod bridge;

pub use bridge::*;
