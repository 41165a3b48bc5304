//! Communication layer for wearable lightshow controllers.
//!
//! - [`transport`]: serial and BLE byte transports
//! - [`protocol`]: the verb protocol, sessions and mode transfers
//! - [`esp`]: firmware flashing through the ESP32 ROM bootloader
//! - [`commands`]: async actions for a UI, with `String` errors

pub mod commands;
pub mod engine;
pub mod error;
pub mod esp;
pub mod logging;
pub mod protocol;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use engine::{Mode, ModeEngine, ModeStore, Rgb};
pub use error::{LinkError, LinkResult};
pub use protocol::{DeviceIdentity, DeviceLink, DuoHeader, TransferProgress};
pub use settings::{LinkSettings, SettingsManager};
pub use transport::{Transport, TransportError, TransportKind};
