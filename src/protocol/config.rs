//! Configuration constants for the verb protocol.

use std::time::Duration;

// ============================================================================
// Handshake
// ============================================================================

/// Greeting attempts before the handshake gives up.
pub const HANDSHAKE_MAX_ATTEMPTS: u32 = 30;

/// How long each attempt listens for the greeting.
pub const HANDSHAKE_ATTEMPT_INTERVAL: Duration = Duration::from_millis(250);

/// Serial baud rate of the device application.
pub const DEVICE_BAUD_RATE: u32 = 115_200;

/// Firmware at or above this version supports per-mode streamed transfers.
pub const STREAMED_TRANSFER_MIN_VERSION: (u32, u32, u32) = (1, 3, 0);

// ============================================================================
// Command timeouts
// ============================================================================

/// Default wait for an acknowledgement or framed reply.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Brightness commands answer quickly or not at all.
pub const BRIGHTNESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Listening for a VortexLink transmission waits on a human pressing a button.
pub const LISTEN_VL_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Framing
// ============================================================================

/// Size of the little-endian length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest payload accepted from a device. Save files are a few KiB.
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Largest mode count accepted in a per-mode pull.
pub const MAX_MODES: usize = 1024;

/// Size of the engine byte-stream header (size, flags, checksum).
pub const ENGINE_STREAM_HEADER_SIZE: usize = 12;

/// Offset of the brightness byte in a GET_GLOBAL_BRIGHTNESS reply.
pub const BRIGHTNESS_REPLY_OFFSET: usize = ENGINE_STREAM_HEADER_SIZE;

// ============================================================================
// Chromalink
// ============================================================================

/// Raw size of the Duo header payload.
pub const DUO_HEADER_SIZE: usize = 6;

/// Firmware block size accepted by a Duo over Chromalink.
pub const DUO_FIRMWARE_BLOCK_SIZE: usize = 128;

/// A Duo erases its flash before acknowledging the firmware size.
pub const DUO_FLASH_ERASE_TIMEOUT: Duration = Duration::from_secs(30);
