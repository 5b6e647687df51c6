//! Reboot a running device into its UF2 bootloader
//!
//! The bootloader is reached from the device's own REPL: the firmware is
//! told to come back up in bootloader mode on its next reset, then reset.
//! Once it re-enumerates, the bootloader drive is located through the
//! session's boot helper.

use crate::clock::Clock;
use crate::runner::{ToolInvocation, ToolRunner};
use crate::session::SessionController;
use fwdemon_core::prelude::*;
use fwdemon_core::SessionCommand;

/// REPL lines that schedule a bootloader reboot and trigger it
pub const BOOTLOADER_SEQUENCE: [&str; 3] = [
    "import microcontroller",
    "microcontroller.on_next_reset(microcontroller.RunMode.BOOTLOADER)",
    "microcontroller.reset()",
];

/// The bootloader sequence as session commands
pub fn bootloader_commands() -> Vec<SessionCommand> {
    BOOTLOADER_SEQUENCE
        .iter()
        .map(|line| SessionCommand::stuff(*line))
        .collect()
}

/// Drives one reset-to-bootloader sequence on a session
pub struct BootstrapOrchestrator<'a, R, C> {
    controller: &'a mut SessionController<R, C>,
}

impl<'a, R: ToolRunner, C: Clock + Clone> BootstrapOrchestrator<'a, R, C> {
    pub fn new(controller: &'a mut SessionController<R, C>) -> Self {
        Self { controller }
    }

    /// Reset the device into its bootloader and locate the boot drive.
    ///
    /// Returns immediately when the session is already in boot mode. Any
    /// REPL command with a nonzero status aborts the sequence.
    pub async fn reset_to_bootloader(self) -> Result<bool> {
        if self.controller.session().boot_mode() {
            debug!("Session already in bootloader mode");
            return Ok(true);
        }

        self.flush_filesystems().await;

        for command in bootloader_commands() {
            let output = self.controller.send(command.clone(), &[]).await?;
            if !output.success() {
                return Err(Error::device_command(
                    "resetting the board to the bootloader",
                    command.tokens().join(" "),
                    output.combined(),
                ));
            }
        }

        let settle = self.controller.config().reenumerate_settle;
        info!(
            "Waiting {} seconds for the board to re-enumerate...",
            settle.as_secs()
        );
        self.controller.settle(settle).await;

        self.controller.discover_boot_mount().await?;
        Ok(self.controller.session().boot_mode())
    }

    /// Flush pending filesystem writes so nothing is lost on reset
    async fn flush_filesystems(&self) {
        let sync = ToolInvocation::new("sync");
        match self.controller.runner().run(&sync).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!("Filesystem flush failed: {}", output.combined().trim_end()),
            Err(e) => warn!("Filesystem flush failed: {}", e),
        }
    }
}
