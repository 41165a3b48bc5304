//! Size-prefixed frame codec.
//!
//! ```text
//! +----------------------+-------------------+
//! | length (u32 LE)      | payload[0..len]   |
//! +----------------------+-------------------+
//! ```
//!
//! The payload is opaque here; integrity checks belong to the mode engine.

use std::time::Duration;

use super::config::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{LinkError, LinkResult};
use crate::transport::Transport;

/// Prefix a payload with its 4-byte little-endian length.
pub fn encode_framed(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Incremental frame decoder fed one byte at a time.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    header: Vec<u8>,
    expected: Option<usize>,
    payload: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns the payload once exactly `length` bytes arrived.
    pub fn push(&mut self, byte: u8) -> LinkResult<Option<Vec<u8>>> {
        let expected = match self.expected {
            Some(expected) => expected,
            None => {
                self.header.push(byte);
                if self.header.len() < FRAME_HEADER_SIZE {
                    return Ok(None);
                }

                let size = u32::from_le_bytes([
                    self.header[0],
                    self.header[1],
                    self.header[2],
                    self.header[3],
                ]) as usize;
                if size > MAX_FRAME_SIZE {
                    return Err(LinkError::FrameTooLarge {
                        size,
                        max_size: MAX_FRAME_SIZE,
                    });
                }

                self.expected = Some(size);
                self.payload.reserve(size);
                if size == 0 {
                    return Ok(Some(self.take()));
                }
                return Ok(None);
            }
        };

        self.payload.push(byte);
        if self.payload.len() == expected {
            Ok(Some(self.take()))
        } else {
            Ok(None)
        }
    }

    /// Error describing a decoder that stopped receiving bytes.
    pub fn stalled_error(&self) -> LinkError {
        match self.expected {
            Some(expected) => LinkError::FrameSizeMismatch {
                expected,
                received: self.payload.len(),
            },
            None => LinkError::Timeout {
                waiting_for: "frame header".to_string(),
            },
        }
    }

    fn take(&mut self) -> Vec<u8> {
        self.header.clear();
        self.expected = None;
        std::mem::take(&mut self.payload)
    }
}

/// Read exactly one frame, failing if it does not complete within `timeout`.
///
/// A frame whose declared length is never reached is a
/// [`LinkError::FrameSizeMismatch`]; the partial payload is discarded.
pub async fn read_framed(transport: &dyn Transport, timeout: Duration) -> LinkResult<Vec<u8>> {
    let mut decoder = FrameDecoder::new();

    let result = tokio::time::timeout(timeout, async {
        loop {
            let byte = transport.read_byte().await?;
            if let Some(payload) = decoder.push(byte)? {
                return Ok::<_, LinkError>(payload);
            }
        }
    })
    .await;

    match result {
        Ok(result) => result,
        Err(_) => Err(decoder.stalled_error()),
    }
}
