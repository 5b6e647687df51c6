//! # fwdemon-core - Core Domain Types
//!
//! Foundation crate for fwdemon. Provides domain types, error handling and
//! logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (thiserror, tracing, dirs).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DeviceSession`] - Immutable snapshot of an interactive device session
//! - [`SessionTransition`] - State change applied with [`DeviceSession::apply`]
//! - [`SessionCommand`] - Command forwarded verbatim to the session
//! - [`SearchType`] - How log lines are matched while waiting for output
//! - [`BuildArtifact`] - Firmware output for one board at one revision
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with structured command/output context
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use fwdemon_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all fwdemon crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use types::{
    revision_prefix, timeout_from_secs, BuildArtifact, BuildStatus, DeviceSession, SearchType,
    SessionCommand, SessionTransition, BLOCKED_SESSION_COMMANDS, COMMAND_TERMINATOR,
    REVISION_PREFIX_LEN,
};
