//! Boundary to the lightshow pattern engine.
//!
//! The engine owns mode semantics and byte-stream serialization. This crate
//! only moves the opaque buffers it produces.

use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// One serialized mode as produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mode {
    pub stream: Vec<u8>,
}

impl Mode {
    pub fn new(stream: Vec<u8>) -> Self {
        Self { stream }
    }
}

/// The caller's local list of modes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModeStore {
    pub modes: Vec<Mode>,
}

impl ModeStore {
    pub fn new(modes: Vec<Mode>) -> Self {
        Self { modes }
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

/// 8-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

/// Operations the link needs from the pattern engine.
///
/// Engine failures are reported as plain messages and surface as
/// [`crate::error::LinkError::Engine`].
#[cfg_attr(test, automock)]
pub trait ModeEngine: Send + Sync {
    /// Serialize the whole store into a single save buffer.
    fn pack_save(&self, store: &ModeStore) -> Result<Vec<u8>, String>;

    /// Replace the store with the contents of a save buffer.
    fn unpack_save(&self, save: &[u8]) -> Result<ModeStore, String>;

    /// A mode that shows one solid colour.
    fn solid_color_mode(&self, color: Rgb) -> Result<Mode, String>;

    /// Wrap raw bytes in an engine byte stream (header plus checksum).
    fn wrap(&self, raw: &[u8]) -> Vec<u8>;

    /// Validate an engine byte stream and return its raw bytes.
    fn unwrap(&self, stream: &[u8]) -> Result<Vec<u8>, String>;
}
