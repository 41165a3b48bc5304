//! ESP32 ROM loader packet encoding.
//!
//! Every command is a request header, a payload, and a response carrying
//! two status bytes. Packets travel SLIP-framed.

use super::config::{
    sync_payload, RomOpcode, CHECKSUM_SEED, DIRECTION_REQUEST, DIRECTION_RESPONSE, FLASH_PAD_BYTE,
};
use crate::error::{LinkError, LinkResult};

/// Request header: direction, opcode, length (u16), checksum (u32).
pub const REQUEST_HEADER_SIZE: usize = 8;

/// Response header: direction, opcode, length (u16), value (u32).
pub const RESPONSE_HEADER_SIZE: usize = 8;

/// Size of the FLASH_DATA sub-header (length, sequence, two reserved words).
pub const FLASH_DATA_HEADER_SIZE: usize = 16;

/// XOR checksum used by FLASH_DATA, seeded with 0xEF.
///
/// `checksum(a ++ b) == checksum_with(b, checksum(a))`.
pub fn checksum(data: &[u8]) -> u8 {
    checksum_with(data, CHECKSUM_SEED)
}

/// Continue a checksum from a previous state.
pub fn checksum_with(data: &[u8], state: u8) -> u8 {
    data.iter().fold(state, |acc, &b| acc ^ b)
}

/// Build a raw (un-SLIPped) request packet.
pub fn build_request(opcode: RomOpcode, data: &[u8], checksum: u32) -> Vec<u8> {
    let mut packet = Vec::with_capacity(REQUEST_HEADER_SIZE + data.len());
    packet.push(DIRECTION_REQUEST);
    packet.push(opcode as u8);
    packet.extend_from_slice(&(data.len() as u16).to_le_bytes());
    packet.extend_from_slice(&checksum.to_le_bytes());
    packet.extend_from_slice(data);
    packet
}

pub fn build_sync() -> Vec<u8> {
    build_request(RomOpcode::Sync, &sync_payload(), 0)
}

/// SPI_ATTACH with default pins.
pub fn build_spi_attach() -> Vec<u8> {
    build_request(RomOpcode::SpiAttach, &[0u8; 8], 0)
}

/// FLASH_BEGIN: erase size, number of blocks, block size, offset.
pub fn build_flash_begin(size: u32, blocks: u32, block_size: u32, offset: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(16);
    for word in [size, blocks, block_size, offset] {
        data.extend_from_slice(&word.to_le_bytes());
    }
    build_request(RomOpcode::FlashBegin, &data, 0)
}

/// FLASH_DATA for one block, padded with 0xFF to `block_size`.
pub fn build_flash_data(block: &[u8], sequence: u32, block_size: usize) -> Vec<u8> {
    let mut padded = block.to_vec();
    if padded.len() < block_size {
        padded.resize(block_size, FLASH_PAD_BYTE);
    }

    let mut data = Vec::with_capacity(FLASH_DATA_HEADER_SIZE + padded.len());
    for word in [padded.len() as u32, sequence, 0, 0] {
        data.extend_from_slice(&word.to_le_bytes());
    }
    data.extend_from_slice(&padded);

    build_request(RomOpcode::FlashData, &data, checksum(&padded) as u32)
}

/// FLASH_END. `reboot == false` keeps the chip in the loader.
pub fn build_flash_end(reboot: bool) -> Vec<u8> {
    // the ROM reads this word as "stay in loader"
    let stay = if reboot { 0u32 } else { 1u32 };
    build_request(RomOpcode::FlashEnd, &stay.to_le_bytes(), 0)
}

pub fn build_read_reg(address: u32) -> Vec<u8> {
    build_request(RomOpcode::ReadReg, &address.to_le_bytes(), 0)
}

/// CHANGE_BAUDRATE: new rate, old rate (0 when talking to the ROM).
pub fn build_change_baudrate(new_baud: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(8);
    data.extend_from_slice(&new_baud.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    build_request(RomOpcode::ChangeBaudrate, &data, 0)
}

/// Parsed response from the ROM loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomResponse {
    pub opcode: u8,
    pub value: u32,
    pub data: Vec<u8>,
}

impl RomResponse {
    /// Parse a response packet.
    pub fn parse(packet: &[u8]) -> LinkResult<Self> {
        if packet.len() < RESPONSE_HEADER_SIZE {
            return Err(LinkError::BadResponse {
                reason: format!("packet too short: {} bytes", packet.len()),
            });
        }
        if packet[0] != DIRECTION_RESPONSE {
            return Err(LinkError::BadResponse {
                reason: format!("direction byte 0x{:02X}", packet[0]),
            });
        }

        let declared = u16::from_le_bytes([packet[2], packet[3]]) as usize;
        let data = &packet[RESPONSE_HEADER_SIZE..];
        if data.len() < declared {
            return Err(LinkError::BadResponse {
                reason: format!("declared {} data bytes, got {}", declared, data.len()),
            });
        }

        Ok(Self {
            opcode: packet[1],
            value: u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]),
            data: data[..declared].to_vec(),
        })
    }

    /// Status and error bytes: `(status, error)`.
    pub fn status(&self) -> Option<(u8, u8)> {
        match self.data.as_slice() {
            [status, error, ..] => Some((*status, *error)),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == Some((0, 0))
    }

    /// Describe a failed status for error messages.
    pub fn failure_reason(&self) -> String {
        match self.status() {
            Some((status, error)) => format!("status {} error 0x{:02X}", status, error),
            None => "response missing status bytes".into(),
        }
    }
}
