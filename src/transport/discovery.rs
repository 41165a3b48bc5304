//! Serial device discovery.
//!
//! Lists USB serial ports whose VID/PID belongs to a USB-UART bridge or the
//! native USB peripheral used by lightshow controllers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};

/// Espressif native USB (ESP32-S2/S3/C3 USB-Serial-JTAG).
pub const ESPRESSIF_VID: u16 = 0x303A;

/// Silicon Labs CP210x bridges.
pub const SILABS_VID: u16 = 0x10C4;

/// WCH CH340/CH9102 bridges.
pub const WCH_VID: u16 = 0x1A86;

/// FTDI bridges.
pub const FTDI_VID: u16 = 0x0403;

/// Bridge product IDs known to be fitted on controllers.
const KNOWN_BRIDGE_PIDS: &[(u16, u16)] = &[
    (SILABS_VID, 0xEA60), // CP2102/CP2104
    (WCH_VID, 0x7523),    // CH340
    (WCH_VID, 0x55D4),    // CH9102
    (FTDI_VID, 0x6001),   // FT232R
    (FTDI_VID, 0x6015),   // FT231X
];

/// A serial port that probably has a controller attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SerialDevice {
    /// Serial port path (e.g., "/dev/cu.usbmodem1234" or "COM3").
    pub port: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub product_name: Option<String>,
    pub manufacturer: Option<String>,
    /// Label shown to the user; numbered when several devices share a name.
    pub label: String,
}

impl SerialDevice {
    fn base_label(&self) -> String {
        if let Some(ref name) = self.product_name {
            name.clone()
        } else if self.vid == ESPRESSIF_VID {
            format!("ESP32 ({})", self.port)
        } else {
            format!("Lightshow device ({})", self.port)
        }
    }

    /// Get a display label for this device.
    pub fn display_label(&self) -> &str {
        &self.label
    }
}

/// Check if a VID/PID combination can be a controller.
pub fn is_compatible_device(vid: u16, pid: u16) -> bool {
    vid == ESPRESSIF_VID || KNOWN_BRIDGE_PIDS.contains(&(vid, pid))
}

/// Find all connected serial devices that look like controllers.
///
/// On macOS, `tty.*` ports are skipped; each device also appears as `cu.*`,
/// which does not block waiting for DCD.
pub fn find_serial_devices() -> Vec<SerialDevice> {
    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            tracing::debug!("port enumeration failed: {}", e);
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    for port in ports {
        #[cfg(target_os = "macos")]
        if port.port_name.contains("/dev/tty.") {
            continue;
        }

        if let SerialPortType::UsbPort(usb_info) = &port.port_type {
            if is_compatible_device(usb_info.vid, usb_info.pid) {
                devices.push(SerialDevice {
                    port: port.port_name.clone(),
                    vid: usb_info.vid,
                    pid: usb_info.pid,
                    serial_number: usb_info.serial_number.clone(),
                    product_name: usb_info.product.clone(),
                    manufacturer: usb_info.manufacturer.clone(),
                    label: String::new(),
                });
            }
        }
    }

    assign_labels(&mut devices);
    devices
}

/// Fill in labels, suffixing " #2", " #3" on repeated names.
fn assign_labels(devices: &mut [SerialDevice]) {
    let mut seen: HashMap<String, u32> = HashMap::new();
    for device in devices.iter_mut() {
        let base = device.base_label();
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        device.label = if *count == 1 {
            base
        } else {
            format!("{} #{}", base, count)
        };
    }
}
