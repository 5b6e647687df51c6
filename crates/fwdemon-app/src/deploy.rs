//! Firmware deployment to a connected device
//!
//! Puts the device in its bootloader (when it is not already there), uploads
//! a firmware image through a [`FirmwareTransport`], waits for the reboot and
//! reconnects the normal session.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fwdemon_core::prelude::*;
use fwdemon_device::{
    Clock, FirmwareTransport, SessionController, TokioClock, ToolRunner, Uf2MassStorage,
};

/// Time the board gets to reboot into the new firmware
pub const DEFAULT_REBOOT_SETTLE: Duration = Duration::from_secs(10);

/// Outcome of a successful deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub board_id: String,
    /// Identification line of the bootloader that accepted the image
    pub bootloader_banner: String,
    pub bytes_uploaded: u64,
    /// Whether the normal session came back after the reboot
    pub reconnected: bool,
}

impl fmt::Display for DeployReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Firmware upload successful!")?;
        writeln!(f, " - Board: {}", self.board_id)?;
        writeln!(f, " - Bootloader: {}", self.bootloader_banner)?;
        write!(f, " - Uploaded: {} bytes", self.bytes_uploaded)?;
        if !self.reconnected {
            write!(f, "\n - Session not reconnected")?;
        }
        Ok(())
    }
}

/// Uploads firmware images to devices
#[derive(Debug)]
pub struct FirmwareDeployer<T = Uf2MassStorage, C = TokioClock> {
    transport: T,
    clock: C,
    reboot_settle: Duration,
}

impl<T: FirmwareTransport, C: Clock> FirmwareDeployer<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            reboot_settle: DEFAULT_REBOOT_SETTLE,
        }
    }

    /// Builder-style reboot settle override
    pub fn with_reboot_settle(mut self, reboot_settle: Duration) -> Self {
        self.reboot_settle = reboot_settle;
        self
    }

    /// Upload `image` to the device behind `session`.
    ///
    /// Every failure comes back as a single [`Error::Deployment`]. A failed
    /// reconnect after the upload is not a failure; it is reported in
    /// [`DeployReport::reconnected`].
    pub async fn deploy<R, SC>(
        &self,
        session: &mut SessionController<R, SC>,
        board_id: &str,
        image: &Path,
    ) -> Result<DeployReport>
    where
        R: ToolRunner,
        SC: Clock + Clone,
    {
        self.try_deploy(session, board_id, image)
            .await
            .map_err(Error::deployment)
    }

    async fn try_deploy<R, SC>(
        &self,
        session: &mut SessionController<R, SC>,
        board_id: &str,
        image: &Path,
    ) -> Result<DeployReport>
    where
        R: ToolRunner,
        SC: Clock + Clone,
    {
        if !tokio::fs::try_exists(image).await.unwrap_or(false) {
            return Err(Error::resource_not_found(image));
        }

        if !session.session().boot_mode() {
            info!("Resetting {} into bootloader mode...", board_id);
            session.reset_to_boot().await?;
        }
        let mount_path = boot_mount(session)?;

        if !self.transport.is_in_bootloader(&mount_path).await {
            return Err(Error::device(format!(
                "entering bootloader mode ({} is not a bootloader drive)",
                mount_path.display()
            )));
        }
        let bootloader_banner = self.transport.read_banner(&mount_path).await?;
        info!("In bootloader mode. Current bootloader: {}", bootloader_banner);

        info!("Uploading firmware...");
        let bytes_uploaded = self.transport.upload(&mount_path, image).await?;

        info!("Waiting for board to reload...");
        self.clock.sleep(self.reboot_settle).await;

        let reconnected = match session.start().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Could not reconnect to {} after upload: {}", board_id, e);
                false
            }
        };

        Ok(DeployReport {
            board_id: board_id.to_string(),
            bootloader_banner,
            bytes_uploaded,
            reconnected,
        })
    }
}

fn boot_mount<R, SC>(session: &SessionController<R, SC>) -> Result<PathBuf>
where
    R: ToolRunner,
    SC: Clock + Clone,
{
    session
        .mount_path()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::device("locating the bootloader drive (no mount path known)"))
}
