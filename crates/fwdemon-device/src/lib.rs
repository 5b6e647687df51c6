//! # fwdemon-device - Device Session Control
//!
//! Owns the interactive session to a CircuitPython device: launching it
//! through helper scripts, forwarding commands, following its log, and
//! rebooting the device into its UF2 bootloader.
//!
//! Depends on [`fwdemon_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Session Management
//! - [`SessionController`] - Start a session, send commands, locate the boot drive
//! - [`SessionConfig`] - Helper script location and session tools
//! - [`BootstrapOrchestrator`] - Reset-to-bootloader sequence
//!
//! ### Log Following
//! - [`LogTailReader`] - Incremental reads and pattern waits on the session log
//! - [`LogCursor`] - Read position within the log
//!
//! ### Seams
//! - [`ToolRunner`] / [`SystemToolRunner`] - Child-process execution
//! - [`Clock`] / [`TokioClock`] - Time source for polling and settle delays
//! - [`FirmwareTransport`] / [`Uf2MassStorage`] - Image transfer to a bootloader
//! - [`ToolAvailability`] - Host tool lookup

pub mod bootstrap;
pub mod clock;
pub mod log_tail;
pub mod runner;
pub mod session;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;
pub mod transport;

pub use bootstrap::{bootloader_commands, BootstrapOrchestrator, BOOTLOADER_SEQUENCE};
pub use clock::{Clock, LocalClock, TokioClock};
pub use log_tail::{
    is_exception_line, scan_lines, LogCursor, LogTailReader, WaitOptions, EXCEPTION_MARKER,
    POLL_INTERVAL, WAIT_POLL_WINDOW,
};
pub use runner::{LocalToolRunner, SystemToolRunner, ToolInvocation, ToolOutput, ToolRunner};
pub use session::{
    parse_banner, BannerMarkers, SessionConfig, SessionController, DEFAULT_REENUMERATE_SETTLE,
};
pub use tool_availability::{ToolAvailability, BUILD_TOOLS};
pub use transport::{FirmwareTransport, LocalFirmwareTransport, Uf2MassStorage, UF2_INFO_FILE};
