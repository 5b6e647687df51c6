//! fwdemon-app - Build, deploy and run orchestration for fwdemon
//!
//! This crate sits on top of [`fwdemon_device`]: it loads the rig
//! configuration, builds firmware from a shared source clone, flashes it to a
//! board and strings those steps together into one run.

pub mod build_pipeline;
pub mod config;
pub mod deploy;
pub mod run;

// Re-export primary types
pub use build_pipeline::{find_firmware_image, BuildConfig, FirmwareBuildPipeline, ToolchainPhase};
pub use config::{load_settings, Settings};
pub use deploy::{DeployReport, FirmwareDeployer, DEFAULT_REBOOT_SETTLE};
pub use run::{FirmwareSource, RunOrchestrator, RunPlan, RunSummary, TestKind};
