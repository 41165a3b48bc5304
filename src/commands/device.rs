//! Device discovery, connection and status actions.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::describe_error;
use crate::error::LinkError;
use crate::protocol::{Capability, DeviceIdentity, DeviceLink, OperationKind, SessionState};
use crate::transport::discovery::{find_serial_devices, SerialDevice};
use crate::transport::serial::SerialTransport;
use crate::transport::{Transport, TransportKind};

/// Connection summary for the frontend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub state: SessionState,
    pub identity: Option<DeviceIdentity>,
    pub capability: Option<Capability>,
    pub transport: Option<TransportKind>,
    /// Operation holding the link, if any.
    pub operation: Option<OperationKind>,
}

impl From<&DeviceLink> for DeviceStatus {
    fn from(link: &DeviceLink) -> Self {
        Self {
            state: link.session_state(),
            identity: link.identity(),
            capability: link.capability(),
            transport: link.transport_kind(),
            operation: link.current_operation(),
        }
    }
}

/// List serial ports that look like controllers.
///
/// Devices with duplicate labels are numbered (e.g., "Spark #1", "Spark #2").
pub async fn detect_serial_devices() -> Result<Vec<SerialDevice>, String> {
    tokio::task::spawn_blocking(find_serial_devices)
        .await
        .map_err(|e| format!("Failed to detect devices: {}", e))
}

/// Open `port` at the configured baud rate and handshake with the device.
pub async fn connect_serial(link: &DeviceLink, port: String) -> Result<DeviceIdentity, String> {
    let baud_rate = link.settings().baud_rate;
    let transport = tokio::task::spawn_blocking(move || SerialTransport::open(&port, baud_rate))
        .await
        .map_err(|e| format!("Failed to open port: {}", e))?
        .map_err(|e| describe_error(&LinkError::from(e)))?;

    let transport: Arc<dyn Transport> = Arc::new(transport);
    let identity = link
        .connect(transport)
        .await
        .map_err(|e| describe_error(&e))?;
    info!(name = %identity.name, version = %identity.version, "connected over serial");
    Ok(identity)
}

/// Scan for BLE controllers advertising a name starting with `name_prefix`.
#[cfg(feature = "ble")]
pub async fn scan_ble_devices(name_prefix: String, scan_secs: u64) -> Result<Vec<String>, String> {
    let devices = crate::transport::ble::scan_devices(
        &name_prefix,
        std::time::Duration::from_secs(scan_secs),
    )
    .await
    .map_err(|e| describe_error(&LinkError::from(e)))?;
    Ok(devices.into_iter().map(|d| d.name).collect())
}

/// Connect to the BLE controller called `name` and handshake with it.
#[cfg(feature = "ble")]
pub async fn connect_ble(
    link: &DeviceLink,
    name: String,
    scan_secs: u64,
) -> Result<DeviceIdentity, String> {
    use crate::transport::ble::{scan_devices, BleTransport};

    let ids = link.settings().ble_service_ids()?;
    let device = scan_devices(&name, std::time::Duration::from_secs(scan_secs))
        .await
        .map_err(|e| describe_error(&LinkError::from(e)))?
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| format!("No BLE device named '{}' found", name))?;

    let transport = BleTransport::connect(&device, ids)
        .await
        .map_err(|e| describe_error(&LinkError::from(e)))?;
    let transport: Arc<dyn Transport> = Arc::new(transport);
    link.connect(transport).await.map_err(|e| describe_error(&e))
}

/// Say goodbye and release the transport.
pub async fn disconnect_device(link: &DeviceLink) -> Result<(), String> {
    link.disconnect().await;
    Ok(())
}

/// Abort whatever the link is waiting on.
pub fn cancel_operation(link: &DeviceLink) {
    link.cancel();
}

pub fn device_status(link: &DeviceLink) -> DeviceStatus {
    DeviceStatus::from(link)
}
