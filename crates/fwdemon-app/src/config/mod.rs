//! Configuration file parsing for fwdemon
//!
//! Supports:
//! - `.fwdemon/config.toml` - Session, build and deploy settings

pub mod settings;
pub mod types;

pub use settings::{config_path, load_settings};
pub use types::*;
