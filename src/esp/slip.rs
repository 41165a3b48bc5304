//! SLIP (Serial Line Internet Protocol) encoding and decoding.
//!
//! Implements RFC 1055 framing as used by the ESP32 ROM loader.
//! See: https://datatracker.ietf.org/doc/html/rfc1055

use std::time::Duration;

use super::config::{SLIP_END, SLIP_ESC, SLIP_ESC_END, SLIP_ESC_ESC, SLIP_MAX_FRAME_SIZE};
use crate::error::{LinkError, LinkResult};
use crate::transport::{Transport, TransportError};

/// Encode data using SLIP framing.
///
/// Wraps the data with END delimiters and escapes any special bytes.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(data.len() * 2 + 2);
    encoded.push(SLIP_END);

    for &byte in data {
        match byte {
            SLIP_END => {
                encoded.push(SLIP_ESC);
                encoded.push(SLIP_ESC_END);
            }
            SLIP_ESC => {
                encoded.push(SLIP_ESC);
                encoded.push(SLIP_ESC_ESC);
            }
            _ => encoded.push(byte),
        }
    }

    encoded.push(SLIP_END);
    encoded
}

/// Decode one complete SLIP frame.
pub fn decode(data: &[u8]) -> LinkResult<Vec<u8>> {
    let mut decoded = Vec::with_capacity(data.len());
    let mut escape_next = false;

    for &byte in data {
        if byte == SLIP_END {
            continue;
        }

        if escape_next {
            match byte {
                SLIP_ESC_END => decoded.push(SLIP_END),
                SLIP_ESC_ESC => decoded.push(SLIP_ESC),
                _ => return Err(LinkError::InvalidSlipEscape),
            }
            escape_next = false;
        } else if byte == SLIP_ESC {
            escape_next = true;
        } else {
            decoded.push(byte);
        }
    }

    if escape_next {
        return Err(LinkError::IncompleteSlipFrame);
    }

    Ok(decoded)
}

/// Streaming SLIP decoder for incremental parsing.
///
/// Bytes before the first END are boot chatter and are dropped.
#[derive(Debug, Default)]
pub struct SlipDecoder {
    buffer: Vec<u8>,
    escape_next: bool,
    in_frame: bool,
}

impl SlipDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            escape_next: false,
            in_frame: false,
        }
    }

    /// Feed a byte to the decoder.
    ///
    /// # Returns
    /// - `Some(Ok(data))` if a complete frame was received
    /// - `Some(Err(e))` on an invalid escape or an oversized frame
    /// - `None` if more data is needed
    pub fn feed(&mut self, byte: u8) -> Option<LinkResult<Vec<u8>>> {
        if byte == SLIP_END {
            if self.in_frame && !self.buffer.is_empty() {
                let frame = std::mem::take(&mut self.buffer);
                self.escape_next = false;
                // This END may also open the next frame
                return Some(Ok(frame));
            }
            self.buffer.clear();
            self.in_frame = true;
            self.escape_next = false;
            return None;
        }

        if !self.in_frame {
            return None;
        }

        if self.escape_next {
            match byte {
                SLIP_ESC_END => self.buffer.push(SLIP_END),
                SLIP_ESC_ESC => self.buffer.push(SLIP_ESC),
                _ => {
                    self.reset();
                    return Some(Err(LinkError::InvalidSlipEscape));
                }
            }
            self.escape_next = false;
        } else if byte == SLIP_ESC {
            self.escape_next = true;
        } else {
            self.buffer.push(byte);
        }

        if self.buffer.len() > SLIP_MAX_FRAME_SIZE {
            let size = self.buffer.len();
            self.reset();
            return Some(Err(LinkError::SlipBufferOverflow {
                size,
                max_size: SLIP_MAX_FRAME_SIZE,
            }));
        }

        None
    }

    /// Reset the decoder state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escape_next = false;
        self.in_frame = false;
    }

    /// Check if the decoder is currently in a frame.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Get the current buffer length.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Read one SLIP frame from a transport.
///
/// Closure of the transport in the middle of a frame is a connection error,
/// never a short frame. Returns `Ok(None)` when `timeout` elapses first.
pub async fn read_frame(
    transport: &dyn Transport,
    decoder: &mut SlipDecoder,
    timeout: Duration,
) -> LinkResult<Option<Vec<u8>>> {
    let read = async {
        loop {
            let byte = transport.read_byte().await?;
            if let Some(frame) = decoder.feed(byte) {
                return frame;
            }
        }
    };

    match tokio::time::timeout(timeout, read).await {
        Ok(Ok(frame)) => Ok(Some(frame)),
        Ok(Err(LinkError::Transport(TransportError::Closed))) if decoder.in_frame() => {
            Err(LinkError::IncompleteSlipFrame)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}
