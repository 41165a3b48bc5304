//! Transport layer shared by the verb protocol and the ESP32 flasher.
//!
//! Serial ports and BLE characteristics deliver bytes very differently: a
//! serial read returns whatever the driver buffered, a BLE notification
//! returns one characteristic value. Both feed a [`ByteBacklog`] so the
//! layers above only ever see one byte at a time.

mod backlog;
#[cfg(feature = "ble")]
pub mod ble;
pub mod discovery;
pub mod serial;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use backlog::{BacklogFeed, ByteBacklog};
#[cfg(feature = "ble")]
pub use ble::BleTransport;
pub use discovery::{find_serial_devices, SerialDevice};
pub use serial::SerialTransport;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Serial port error from the serialport crate.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bluetooth stack error.
    #[cfg(feature = "ble")]
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The connection is gone; no more bytes will arrive.
    #[error("Connection closed")]
    Closed,

    /// A pending read was cancelled.
    #[error("Read cancelled")]
    Cancelled,

    /// Serial port is busy (in use by another process).
    #[error("Port '{port}' is busy or in use by another application")]
    PortBusy { port: String },

    /// Permission denied accessing serial port.
    #[error("Permission denied for port '{port}'")]
    PortPermissionDenied { port: String },

    /// No compatible device was found.
    #[error("No compatible device found")]
    NoDeviceFound,

    /// The peripheral lacks a required GATT characteristic.
    #[error("Missing GATT characteristic {uuid}")]
    MissingCharacteristic { uuid: String },
}

impl TransportError {
    /// True for errors after which the transport cannot be used again.
    pub fn is_connection_lost(&self) -> bool {
        !matches!(self, TransportError::Cancelled)
    }
}

/// Which physical channel a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Ble,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Serial => f.write_str("serial"),
            TransportKind::Ble => f.write_str("BLE"),
        }
    }
}

/// Byte transport to a device.
///
/// Implementations must tell "connection lost" ([`TransportError::Closed`])
/// apart from "no data yet", which is simply a pending `read_byte`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which channel this transport uses.
    fn kind(&self) -> TransportKind;

    /// Write all bytes to the device.
    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next inbound byte.
    async fn read_byte(&self) -> Result<u8, TransportError>;

    /// Whether the underlying connection is still up.
    fn is_active(&self) -> bool;

    /// Abort a pending `read_byte` with [`TransportError::Cancelled`].
    ///
    /// Safe to call when nothing is pending. Never interrupts a write.
    fn cancel(&self);

    /// Drop any bytes received but not yet consumed.
    async fn clear_input(&self);

    /// Release the connection.
    async fn close(&self);
}

/// Modem control lines wired to the reset and boot-select pins.
///
/// On the usual ESP32 auto-reset circuit DTR drives GPIO0 and RTS drives EN,
/// both inverted.
#[async_trait]
pub trait ControlLines: Send + Sync {
    async fn set_dtr(&self, level: bool) -> Result<(), TransportError>;
    async fn set_rts(&self, level: bool) -> Result<(), TransportError>;

    /// Reconfigure the local line speed after the device agreed to it.
    async fn set_baud_rate(&self, baud_rate: u32) -> Result<(), TransportError>;
}
