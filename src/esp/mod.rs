//! ESP32 ROM bootloader flashing.
//!
//! # Protocol Overview
//!
//! The ROM loader speaks SLIP-framed request/response packets over the same
//! USB-serial port the verb protocol uses:
//!
//! 1. **Reset** - DTR/RTS pulse EN with GPIO0 held low
//! 2. **Sync** - SYNC packet until the loader answers
//! 3. **Flash** - FLASH_BEGIN, one FLASH_DATA per block, FLASH_END
//! 4. **Restart** - EN pulse with GPIO0 released
//!
//! The verb layers are bypassed entirely while flashing.

pub mod config;
pub mod firmware_reader;
pub mod flasher;
pub mod packet;
pub mod slip;

pub use firmware_reader::{
    read_firmware_bin, read_firmware_package, FirmwareChunk, FirmwareImage, ImageRole,
};
pub use flasher::{EspFlasher, FlashStage};
