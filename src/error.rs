//! Error types for the device link and the ESP32 flasher.

use thiserror::Error;

use crate::protocol::command::OperationKind;
use crate::protocol::verb::Verb;
use crate::transport::TransportError;

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors that can occur while talking to a device.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The underlying transport failed or closed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Standard I/O error (firmware files, settings).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON parsing error for manifest.json.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The device never produced a matching greeting.
    #[error("Device did not greet after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    /// No active device session.
    #[error("No device connected")]
    NotConnected,

    /// Another operation holds the link.
    #[error("Device is busy with {current}")]
    Busy { current: OperationKind },

    /// The device answered with a different verb than expected.
    #[error("Expected {expected} but received 0x{received:02X}")]
    AckMismatch { expected: Verb, received: u8 },

    /// Nothing arrived before the deadline.
    #[error("Timed out waiting for {waiting_for}")]
    Timeout { waiting_for: String },

    /// A frame's declared length was never satisfied.
    #[error("Frame declared {expected} bytes but only {received} arrived")]
    FrameSizeMismatch { expected: usize, received: usize },

    /// A frame declared a length above the accepted maximum.
    #[error("Frame size {size} exceeds maximum {max_size}")]
    FrameTooLarge { size: usize, max_size: usize },

    /// A payload failed its embedded integrity check.
    #[error("Integrity check failed for {context}")]
    IntegrityCheckFailed { context: String },

    /// A payload was shorter than its fixed layout.
    #[error("Payload too short for {context}: need {expected} bytes, got {actual}")]
    ShortPayload {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// The device announced more modes than a controller can hold.
    #[error("Device announced {count} modes, at most {max} are supported")]
    TooManyModes { count: usize, max: usize },

    /// The mode engine rejected a buffer.
    #[error("Mode engine error: {0}")]
    Engine(String),

    /// Invalid SLIP escape sequence encountered during decoding.
    #[error("Invalid SLIP escape sequence")]
    InvalidSlipEscape,

    /// SLIP frame is incomplete (no END delimiter found).
    #[error("Incomplete SLIP frame")]
    IncompleteSlipFrame,

    /// SLIP frame grew past the decoder limit.
    #[error("SLIP frame of {size} bytes exceeds maximum {max_size}")]
    SlipBufferOverflow { size: usize, max_size: usize },

    /// Bootloader response could not be parsed or did not match the request.
    #[error("Unexpected bootloader response: {reason}")]
    BadResponse { reason: String },

    /// Bootloader never answered the sync packet.
    #[error("Bootloader sync failed after {attempts} attempts")]
    SyncFailed { attempts: u32 },

    /// Flashing failed after the bootloader was synced.
    #[error("Flash write failed at block {sequence}: {reason}")]
    FlashWriteFailed { sequence: u32, reason: String },

    /// Toggling the reset/boot lines to enter the ROM loader failed.
    #[error("Could not enter the bootloader: {reason}")]
    EnterBootloaderFailed { reason: String },

    /// The loader rejected setup (baud change, SPI attach) before any block.
    #[error("Flash setup failed: {reason}")]
    FlashSetupFailed { reason: String },

    /// Restarting into the new firmware failed.
    #[error("Device reset failed: {reason}")]
    ResetFailed { reason: String },

    /// Flash settings the ROM loader cannot work with.
    #[error("Invalid flash settings: {reason}")]
    InvalidFlashSettings { reason: String },

    /// Required file missing from the firmware package.
    #[error("Missing file in firmware package: {filename}")]
    MissingFile { filename: String },

    /// Invalid or malformed manifest.json.
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    /// Firmware file digest differs from the manifest.
    #[error("SHA-256 mismatch for {filename}")]
    DigestMismatch { filename: String },

    /// Operation was cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,
}

impl LinkError {
    /// Check if this error is retriable (transient errors that may succeed on retry).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LinkError::Timeout { .. }
                | LinkError::Busy { .. }
                | LinkError::AckMismatch { .. }
                | LinkError::FrameSizeMismatch { .. }
        )
    }

    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            LinkError::Transport(_) => "LNK-001",
            LinkError::Io(_) => "LNK-002",
            LinkError::Zip(_) => "LNK-003",
            LinkError::Json(_) => "LNK-004",
            LinkError::HandshakeTimeout { .. } => "LNK-010",
            LinkError::NotConnected => "LNK-011",
            LinkError::Busy { .. } => "LNK-012",
            LinkError::AckMismatch { .. } => "LNK-020",
            LinkError::Timeout { .. } => "LNK-021",
            LinkError::FrameSizeMismatch { .. } => "LNK-022",
            LinkError::FrameTooLarge { .. } => "LNK-023",
            LinkError::IntegrityCheckFailed { .. } => "LNK-030",
            LinkError::ShortPayload { .. } => "LNK-031",
            LinkError::Engine(_) => "LNK-032",
            LinkError::TooManyModes { .. } => "LNK-033",
            LinkError::InvalidSlipEscape => "ESP-010",
            LinkError::IncompleteSlipFrame => "ESP-011",
            LinkError::SlipBufferOverflow { .. } => "ESP-012",
            LinkError::BadResponse { .. } => "ESP-020",
            LinkError::SyncFailed { .. } => "ESP-030",
            LinkError::FlashWriteFailed { .. } => "ESP-031",
            LinkError::ResetFailed { .. } => "ESP-032",
            LinkError::EnterBootloaderFailed { .. } => "ESP-033",
            LinkError::FlashSetupFailed { .. } => "ESP-034",
            LinkError::InvalidFlashSettings { .. } => "ESP-050",
            LinkError::MissingFile { .. } => "ESP-040",
            LinkError::InvalidManifest { .. } => "ESP-041",
            LinkError::DigestMismatch { .. } => "ESP-042",
            LinkError::Cancelled => "LNK-099",
        }
    }

    /// Recovery guidance for firmware flashing failures.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            LinkError::SyncFailed { .. } => Some(
                "Unplug the device, hold the boot button while plugging it back in, then retry.",
            ),
            LinkError::FlashWriteFailed { .. } => {
                Some("The firmware is incomplete. Keep the device plugged in and flash again.")
            }
            LinkError::EnterBootloaderFailed { .. } => Some(
                "Nothing was written. Unplug the device, hold the boot button while plugging it back in, then retry.",
            ),
            LinkError::FlashSetupFailed { .. } => {
                Some("Nothing was written. Unplug and replug the device, then retry.")
            }
            LinkError::ResetFailed { .. } => Some(
                "The firmware was written. Unplug and replug the device to start it manually.",
            ),
            _ => None,
        }
    }

    /// True when the error means the transport is gone for good.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::Transport(e) if e.is_connection_lost())
    }
}
