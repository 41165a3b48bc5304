//! Configuration constants for the ESP32 ROM bootloader protocol.

use std::time::Duration;

// ============================================================================
// Serial Communication
// ============================================================================

/// Baud rate the ROM loader starts at.
pub const ROM_BAUD_RATE: u32 = 115_200;

// ============================================================================
// SLIP Protocol Constants
// ============================================================================

/// SLIP frame delimiter (END byte).
pub const SLIP_END: u8 = 0xC0;

/// SLIP escape byte.
pub const SLIP_ESC: u8 = 0xDB;

/// SLIP escaped END (0xC0 encoded as 0xDB 0xDC).
pub const SLIP_ESC_END: u8 = 0xDC;

/// SLIP escaped ESC (0xDB encoded as 0xDB 0xDD).
pub const SLIP_ESC_ESC: u8 = 0xDD;

/// Largest SLIP frame the decoder accepts.
pub const SLIP_MAX_FRAME_SIZE: usize = 0x4000;

// ============================================================================
// ROM Loader Commands
// ============================================================================

/// Direction byte of a request packet.
pub const DIRECTION_REQUEST: u8 = 0x00;

/// Direction byte of a response packet.
pub const DIRECTION_RESPONSE: u8 = 0x01;

/// ROM loader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RomOpcode {
    FlashBegin = 0x02,
    FlashData = 0x03,
    FlashEnd = 0x04,
    Sync = 0x08,
    ReadReg = 0x0A,
    SpiAttach = 0x0D,
    ChangeBaudrate = 0x0F,
}

impl RomOpcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(RomOpcode::FlashBegin),
            0x03 => Some(RomOpcode::FlashData),
            0x04 => Some(RomOpcode::FlashEnd),
            0x08 => Some(RomOpcode::Sync),
            0x0A => Some(RomOpcode::ReadReg),
            0x0D => Some(RomOpcode::SpiAttach),
            0x0F => Some(RomOpcode::ChangeBaudrate),
            _ => None,
        }
    }
}

/// Payload of the SYNC command: 07 07 12 20 followed by 32 bytes of 0x55.
pub fn sync_payload() -> Vec<u8> {
    let mut payload = vec![0x07, 0x07, 0x12, 0x20];
    payload.extend_from_slice(&[0x55; 32]);
    payload
}

/// Register whose value identifies the chip family.
pub const CHIP_DETECT_MAGIC_REG_ADDR: u32 = 0x4000_1000;

/// Seed of the FLASH_DATA XOR checksum.
pub const CHECKSUM_SEED: u8 = 0xEF;

/// Flash write block size accepted by the ROM loader.
pub const FLASH_WRITE_SIZE: usize = 0x400;

/// Flash sector size used for erase timing.
pub const FLASH_SECTOR_SIZE: usize = 0x1000;

/// Padding byte for a short final block (erased flash value).
pub const FLASH_PAD_BYTE: u8 = 0xFF;

// ============================================================================
// Timing
// ============================================================================

/// Times the SYNC packet is sent before giving up.
pub const SYNC_MAX_ATTEMPTS: u32 = 5;

/// Wait for one SYNC response.
pub const SYNC_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait for an ordinary command response.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Erase time budget per megabyte for FLASH_BEGIN.
pub const ERASE_TIMEOUT_PER_MB: Duration = Duration::from_secs(10);

/// Reset line hold time.
pub const RESET_HOLD_MS: u64 = 100;

/// Time GPIO0 stays low after EN is released.
pub const BOOT_RELEASE_MS: u64 = 50;

/// FLASH_BEGIN timeout: erase scales with image size.
pub fn flash_begin_timeout(size: usize) -> Duration {
    let megabytes = size as f64 / (1024.0 * 1024.0);
    let scaled = ERASE_TIMEOUT_PER_MB.mul_f64(megabytes);
    std::cmp::max(COMMAND_TIMEOUT, scaled)
}

/// Number of write blocks needed for `size` bytes.
pub fn block_count(size: usize, block_size: usize) -> usize {
    size.div_ceil(block_size)
}

// ============================================================================
// Default Flash Layout
// ============================================================================

pub const BOOTLOADER_ADDRESS: u32 = 0x0;
pub const PARTITION_TABLE_ADDRESS: u32 = 0x8000;
pub const BOOT_APP0_ADDRESS: u32 = 0xE000;
pub const APPLICATION_ADDRESS: u32 = 0x10000;
