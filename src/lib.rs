//! fwdemon Library
//!
//! Entry points for the `fwdemon` binary. The work itself lives in the
//! workspace crates.

pub mod cli;

// Re-export main entry points
pub use cli::{run, Args};
