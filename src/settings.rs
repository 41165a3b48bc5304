//! Link and flasher settings with JSON persistence.
//!
//! Every field carries `#[serde(default)]` so a settings file written by an
//! older version still loads; missing values fall back to the protocol
//! defaults in `protocol::config` and `esp::config`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::esp::config as esp;
use crate::protocol::config as proto;

/// What to do when a device answers with a different verb than expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AckMismatchPolicy {
    /// Fail the exchange with `AckMismatch`.
    #[default]
    Strict,
    /// Log the stray byte and keep waiting for the expected verb.
    Lenient,
}

/// ESP32 flash addresses of each image role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlashLayout {
    pub bootloader: u32,
    pub partition_table: u32,
    pub boot_app0: u32,
    pub application: u32,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            bootloader: esp::BOOTLOADER_ADDRESS,
            partition_table: esp::PARTITION_TABLE_ADDRESS,
            boot_app0: esp::BOOT_APP0_ADDRESS,
            application: esp::APPLICATION_ADDRESS,
        }
    }
}

/// Settings for the ESP32 ROM bootloader client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlashSettings {
    pub baud_rate: u32,
    pub sync_attempts: u32,
    pub write_block_size: usize,
    pub reset_hold_ms: u64,
    pub boot_release_ms: u64,
    pub layout: FlashLayout,
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self {
            baud_rate: esp::ROM_BAUD_RATE,
            sync_attempts: esp::SYNC_MAX_ATTEMPTS,
            write_block_size: esp::FLASH_WRITE_SIZE,
            reset_hold_ms: esp::RESET_HOLD_MS,
            boot_release_ms: esp::BOOT_RELEASE_MS,
            layout: FlashLayout::default(),
        }
    }
}

impl FlashSettings {
    pub fn reset_hold(&self) -> Duration {
        Duration::from_millis(self.reset_hold_ms)
    }

    pub fn boot_release(&self) -> Duration {
        Duration::from_millis(self.boot_release_ms)
    }
}

/// Settings for device sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub handshake_attempts: u32,
    pub handshake_interval_ms: u64,
    pub command_timeout_ms: u64,
    pub brightness_timeout_ms: u64,
    pub listen_vl_timeout_ms: u64,
    pub ack_mismatch_policy: AckMismatchPolicy,
    /// GATT service and characteristic UUIDs (Nordic UART by default).
    pub ble_service_uuid: String,
    pub ble_write_uuid: String,
    pub ble_notify_uuid: String,
    pub flash: FlashSettings,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: proto::DEVICE_BAUD_RATE,
            handshake_attempts: proto::HANDSHAKE_MAX_ATTEMPTS,
            handshake_interval_ms: proto::HANDSHAKE_ATTEMPT_INTERVAL.as_millis() as u64,
            command_timeout_ms: proto::COMMAND_TIMEOUT.as_millis() as u64,
            brightness_timeout_ms: proto::BRIGHTNESS_TIMEOUT.as_millis() as u64,
            listen_vl_timeout_ms: proto::LISTEN_VL_TIMEOUT.as_millis() as u64,
            ack_mismatch_policy: AckMismatchPolicy::Strict,
            ble_service_uuid: "6e400001-b5a3-f393-e0a9-e50e24dcca9e".to_string(),
            ble_write_uuid: "6e400002-b5a3-f393-e0a9-e50e24dcca9e".to_string(),
            ble_notify_uuid: "6e400003-b5a3-f393-e0a9-e50e24dcca9e".to_string(),
            flash: FlashSettings::default(),
        }
    }
}

impl LinkSettings {
    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn brightness_timeout(&self) -> Duration {
        Duration::from_millis(self.brightness_timeout_ms)
    }

    pub fn listen_vl_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_vl_timeout_ms)
    }

    /// GATT identifiers parsed from the configured strings.
    #[cfg(feature = "ble")]
    pub fn ble_service_ids(&self) -> Result<crate::transport::ble::BleServiceIds, String> {
        let parse = |s: &str| {
            uuid::Uuid::parse_str(s).map_err(|e| format!("Invalid UUID '{}': {}", s, e))
        };
        Ok(crate::transport::ble::BleServiceIds {
            service: parse(&self.ble_service_uuid)?,
            write: parse(&self.ble_write_uuid)?,
            notify: parse(&self.ble_notify_uuid)?,
        })
    }
}

/// Settings file name stored in app data directory.
const SETTINGS_FILENAME: &str = "link_settings.json";

/// Manages persistence of link settings to JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager for the given app data directory.
    pub fn new(app_data_dir: &Path) -> Self {
        let settings_file_path = app_data_dir.join(SETTINGS_FILENAME);
        Self { settings_file_path }
    }

    /// Load settings from disk, returning defaults if file doesn't exist.
    pub fn load(&self) -> Result<LinkSettings, String> {
        if !self.settings_file_path.exists() {
            return Ok(LinkSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path)
            .map_err(|e| format!("Failed to read settings file: {}", e))?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(LinkSettings::default());
        }

        serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse settings JSON: {}", e))
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &LinkSettings) -> Result<(), String> {
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }

        let contents = serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(&self.settings_file_path, contents)
            .map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
