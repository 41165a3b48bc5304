//! Firmware actions: package validation, ESP32 flashing and Duo firmware
//! over Chromalink.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::{describe_error, report, ProgressSender};
use crate::error::LinkError;
use crate::esp::config::ROM_BAUD_RATE;
use crate::esp::{read_firmware_bin, read_firmware_package, EspFlasher, FirmwareImage, FlashStage};
use crate::protocol::DeviceLink;
use crate::settings::FlashLayout;
use crate::transport::serial::SerialTransport;
use crate::transport::Transport;

/// One image inside a validated package.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub address: u32,
    pub size: usize,
}

/// Information about a firmware package.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareInfo {
    pub version: Option<String>,
    pub chip: Option<String>,
    pub images: Vec<ImageInfo>,
    /// Bytes that will be written in total.
    pub total_size: usize,
}

impl From<&FirmwareImage> for FirmwareInfo {
    fn from(image: &FirmwareImage) -> Self {
        Self {
            version: image.version.clone(),
            chip: image.chip.clone(),
            images: image
                .chunks
                .iter()
                .map(|c| ImageInfo {
                    address: c.address,
                    size: c.data.len(),
                })
                .collect(),
            total_size: image.total_size(),
        }
    }
}

fn is_raw_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("bin"))
}

/// Load a `.zip` package, or a bare `.bin` placed at the application address.
async fn load_image(path: PathBuf, layout: FlashLayout) -> Result<FirmwareImage, String> {
    tokio::task::spawn_blocking(move || {
        if is_raw_binary(&path) {
            read_firmware_bin(&path, layout.application)
        } else {
            read_firmware_package(&path, &layout)
        }
    })
    .await
    .map_err(|e| format!("Failed to read firmware: {}", e))?
    .map_err(|e| describe_error(&e))
}

/// Check that a firmware file can be flashed and describe what it contains.
pub async fn validate_firmware_package(
    firmware_path: String,
    layout: FlashLayout,
) -> Result<FirmwareInfo, String> {
    let image = load_image(PathBuf::from(firmware_path), layout).await?;
    Ok(FirmwareInfo::from(&image))
}

/// Flash an ESP32 controller through its ROM bootloader.
///
/// Any session on `link` is closed first since the flasher needs the port to
/// itself. Progress arrives as [`FlashStage`] events.
pub async fn flash_firmware(
    link: &DeviceLink,
    serial_port: String,
    firmware_path: String,
    progress: ProgressSender,
) -> Result<(), String> {
    let settings = link.settings().flash.clone();

    report(&progress, FlashStage::ReadingPackage);
    let image = load_image(PathBuf::from(firmware_path), settings.layout).await?;

    link.disconnect().await;

    let port = serial_port.clone();
    let transport = tokio::task::spawn_blocking(move || SerialTransport::open(&port, ROM_BAUD_RATE))
        .await
        .map_err(|e| format!("Failed to open port: {}", e))?
        .map_err(|e| describe_error(&LinkError::from(e)))?;

    let mut flasher = EspFlasher::new(transport, settings);
    let result = flasher
        .flash_image(&image, |stage| report(&progress, stage))
        .await;
    flasher.into_transport().close().await;

    match result {
        Ok(()) => {
            info!(port = %serial_port, bytes = image.total_size(), "flash complete");
            Ok(())
        }
        Err(e) => Err(describe_error(&e)),
    }
}

/// Send a raw firmware binary to the Duo attached to the connected device.
pub async fn flash_duo_firmware(
    link: &DeviceLink,
    firmware_path: String,
    progress: ProgressSender,
) -> Result<(), String> {
    let image = tokio::task::spawn_blocking(move || read_firmware_bin(&firmware_path, 0))
        .await
        .map_err(|e| format!("Failed to read firmware: {}", e))?
        .map_err(|e| describe_error(&e))?;
    let data: Vec<u8> = image.chunks.into_iter().flat_map(|c| c.data).collect();

    link.flash_duo_firmware(&data, |p| report(&progress, p))
        .await
        .map_err(|e| describe_error(&e))
}
