//! Firmware transfer to a device sitting in its bootloader
//!
//! UF2 bootloaders expose a small mass-storage drive. The drive carries an
//! `INFO_UF2.TXT` file describing the bootloader, and any `.uf2` file copied
//! onto it is flashed and the device reboots.

use std::path::Path;

use fwdemon_core::prelude::*;

/// File every UF2 bootloader drive carries
pub const UF2_INFO_FILE: &str = "INFO_UF2.TXT";

/// Device-side firmware transfer capability
#[trait_variant::make(FirmwareTransport: Send)]
pub trait LocalFirmwareTransport {
    /// Whether the drive at `mount_path` is a bootloader accepting images
    async fn is_in_bootloader(&self, mount_path: &Path) -> bool;

    /// The bootloader's self-reported identification line
    async fn read_banner(&self, mount_path: &Path) -> Result<String>;

    /// Transfer `image` byte-for-byte, returning the number of bytes written
    async fn upload(&self, mount_path: &Path, image: &Path) -> Result<u64>;
}

/// UF2 transfer through the bootloader's mass-storage drive
#[derive(Debug, Clone, Copy, Default)]
pub struct Uf2MassStorage;

impl FirmwareTransport for Uf2MassStorage {
    async fn is_in_bootloader(&self, mount_path: &Path) -> bool {
        tokio::fs::try_exists(mount_path.join(UF2_INFO_FILE))
            .await
            .unwrap_or(false)
    }

    async fn read_banner(&self, mount_path: &Path) -> Result<String> {
        let info_path = mount_path.join(UF2_INFO_FILE);
        let content = tokio::fs::read_to_string(&info_path).await.map_err(|e| {
            Error::device(format!(
                "reading the bootloader banner from {}: {}",
                info_path.display(),
                e
            ))
        })?;
        Ok(content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string())
    }

    async fn upload(&self, mount_path: &Path, image: &Path) -> Result<u64> {
        if !tokio::fs::try_exists(image).await.unwrap_or(false) {
            return Err(Error::resource_not_found(image));
        }
        let file_name = image
            .file_name()
            .ok_or_else(|| Error::argument(format!("'{}' is not a file", image.display())))?;
        let destination = mount_path.join(file_name);

        info!("Copying {} to {}", image.display(), destination.display());
        let bytes = tokio::fs::copy(image, &destination).await.map_err(|e| {
            Error::device_command(
                "copying new firmware",
                format!("cp {} {}", image.display(), destination.display()),
                e.to_string(),
            )
        })?;
        Ok(bytes)
    }
}
