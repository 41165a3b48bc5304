use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::esp::config::{RomOpcode, DIRECTION_REQUEST, DIRECTION_RESPONSE};
use crate::esp::packet::{checksum, FLASH_DATA_HEADER_SIZE, REQUEST_HEADER_SIZE};
use crate::esp::slip;

/// Value returned for READ_REG of the chip-detect register (ESP32).
pub const FAKE_CHIP_MAGIC: u32 = 0x00F0_1D83;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashBeginRecord {
    pub size: u32,
    pub blocks: u32,
    pub block_size: u32,
    pub offset: u32,
}

/// Everything the fake loader has seen.
#[derive(Debug, Clone, Default)]
pub struct BootloaderState {
    pub sync_requests: u32,
    pub begins: Vec<FlashBeginRecord>,
    pub block_sequences: Vec<u32>,
    pub finishes: u32,
    pub checksum_errors: u32,
    flash: BTreeMap<u32, u8>,
}

impl BootloaderState {
    /// Bytes programmed at `address..address + len` (0xFF where unwritten).
    pub fn written(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.flash.get(&(address + i)).copied().unwrap_or(0xFF))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Behaviour {
    ignore_syncs: u32,
    reject_block: Option<u32>,
    reject_spi_attach: bool,
}

/// ESP32 ROM loader answering SLIP packets.
#[derive(Clone, Default)]
pub struct FakeEspBootloader {
    state: Arc<Mutex<BootloaderState>>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl FakeEspBootloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave the first `count` SYNC packets unanswered.
    pub fn ignore_first_syncs(self, count: u32) -> Self {
        self.behaviour.lock().unwrap().ignore_syncs = count;
        self
    }

    /// Answer FLASH_DATA with sequence `sequence` with a failure status.
    pub fn reject_block(self, sequence: u32) -> Self {
        self.behaviour.lock().unwrap().reject_block = Some(sequence);
        self
    }

    /// Answer SPI_ATTACH with a failure status.
    pub fn reject_spi_attach(self) -> Self {
        self.behaviour.lock().unwrap().reject_spi_attach = true;
        self
    }

    /// Snapshot of what the loader has seen.
    pub fn state(&self) -> BootloaderState {
        self.state.lock().unwrap().clone()
    }

    fn response(opcode: u8, value: u32, ok: bool) -> Vec<u8> {
        let mut packet = vec![DIRECTION_RESPONSE, opcode, 2, 0];
        packet.extend_from_slice(&value.to_le_bytes());
        if ok {
            packet.extend_from_slice(&[0, 0]);
        } else {
            packet.extend_from_slice(&[1, 0x07]);
        }
        slip::encode(&packet)
    }

    fn word(data: &[u8], index: usize) -> u32 {
        data.get(index * 4..index * 4 + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0)
    }

    /// Handle one SLIP-framed request written by the host.
    pub fn receive(&self, data: &[u8]) -> Vec<u8> {
        let Ok(packet) = slip::decode(data) else {
            return Vec::new();
        };
        if packet.len() < REQUEST_HEADER_SIZE || packet[0] != DIRECTION_REQUEST {
            return Vec::new();
        }
        let opcode = packet[1];
        let declared_checksum = Self::word(&packet[4..8], 0);
        let body = &packet[REQUEST_HEADER_SIZE..];

        let behaviour = self.behaviour.lock().unwrap();
        let mut state = self.state.lock().unwrap();

        match RomOpcode::from_byte(opcode) {
            Some(RomOpcode::Sync) => {
                state.sync_requests += 1;
                if state.sync_requests <= behaviour.ignore_syncs {
                    Vec::new()
                } else {
                    Self::response(opcode, 0, true)
                }
            }
            Some(RomOpcode::FlashBegin) => {
                state.begins.push(FlashBeginRecord {
                    size: Self::word(body, 0),
                    blocks: Self::word(body, 1),
                    block_size: Self::word(body, 2),
                    offset: Self::word(body, 3),
                });
                Self::response(opcode, 0, true)
            }
            Some(RomOpcode::FlashData) => {
                let sequence = Self::word(body, 1);
                let payload = body.get(FLASH_DATA_HEADER_SIZE..).unwrap_or_default();
                state.block_sequences.push(sequence);

                if checksum(payload) as u32 != declared_checksum {
                    state.checksum_errors += 1;
                    return Self::response(opcode, 0, false);
                }
                if behaviour.reject_block == Some(sequence) {
                    return Self::response(opcode, 0, false);
                }

                let Some(begin) = state.begins.last().copied() else {
                    return Self::response(opcode, 0, false);
                };
                let base = begin.offset + sequence * begin.block_size;
                for (i, &b) in payload.iter().enumerate() {
                    state.flash.insert(base + i as u32, b);
                }
                Self::response(opcode, 0, true)
            }
            Some(RomOpcode::FlashEnd) => {
                state.finishes += 1;
                Self::response(opcode, 0, true)
            }
            Some(RomOpcode::ReadReg) => Self::response(opcode, FAKE_CHIP_MAGIC, true),
            Some(RomOpcode::SpiAttach) => Self::response(opcode, 0, !behaviour.reject_spi_attach),
            Some(RomOpcode::ChangeBaudrate) => Self::response(opcode, 0, true),
            None => Self::response(opcode, 0, false),
        }
    }
}
