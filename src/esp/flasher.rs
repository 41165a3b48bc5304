//! ESP32 ROM bootloader client.
//!
//! Orchestrates a complete flash:
//! 1. Reset into the ROM loader using DTR/RTS
//! 2. SYNC until the loader answers
//! 3. SPI_ATTACH
//! 4. FLASH_BEGIN + FLASH_DATA blocks for every chunk
//! 5. FLASH_END, staying in the loader
//! 6. Hard reset into the application

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::{
    block_count, flash_begin_timeout, RomOpcode, CHIP_DETECT_MAGIC_REG_ADDR, COMMAND_TIMEOUT,
    FLASH_WRITE_SIZE, ROM_BAUD_RATE, SYNC_TIMEOUT,
};
use super::firmware_reader::{FirmwareChunk, FirmwareImage};
use super::packet::{
    build_change_baudrate, build_flash_begin, build_flash_data, build_flash_end, build_read_reg,
    build_spi_attach, build_sync, RomResponse,
};
use super::slip::{self, SlipDecoder};
use crate::error::{LinkError, LinkResult};
use crate::settings::FlashSettings;
use crate::transport::{ControlLines, Transport, TransportError};

/// Flash progress stages for UI feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data")]
pub enum FlashStage {
    /// Reading firmware package.
    ReadingPackage,
    /// Toggling DTR/RTS to enter the ROM loader.
    EnteringBootloader,
    /// Sending SYNC packets.
    Syncing,
    /// Configuring the SPI flash interface.
    Attaching,
    /// Erasing the region for one chunk.
    Erasing { address: u32 },
    /// Writing blocks.
    Writing { written: usize, total: usize },
    /// Sending FLASH_END.
    Finalizing,
    /// Resetting into the new firmware.
    Restarting,
    /// Flash complete.
    Complete,
    /// Debug log message.
    Log { message: String },
}

impl FlashStage {
    /// Get a percentage estimate for this stage.
    pub fn percent(&self) -> f32 {
        match self {
            FlashStage::ReadingPackage => 0.0,
            FlashStage::EnteringBootloader => 2.0,
            FlashStage::Syncing => 5.0,
            FlashStage::Attaching => 8.0,
            FlashStage::Erasing { .. } => 10.0,
            FlashStage::Writing { written, total } => {
                if *total == 0 {
                    10.0
                } else {
                    10.0 + (*written as f32 / *total as f32) * 85.0
                }
            }
            FlashStage::Finalizing => 96.0,
            FlashStage::Restarting => 98.0,
            FlashStage::Complete => 100.0,
            // Log messages don't affect progress percentage
            FlashStage::Log { .. } => -1.0,
        }
    }

    /// Get a human-readable message for this stage.
    pub fn message(&self) -> String {
        match self {
            FlashStage::ReadingPackage => "Reading firmware package...".into(),
            FlashStage::EnteringBootloader => "Entering bootloader mode...".into(),
            FlashStage::Syncing => "Connecting to bootloader...".into(),
            FlashStage::Attaching => "Preparing flash...".into(),
            FlashStage::Erasing { address } => format!("Erasing flash at 0x{:X}...", address),
            FlashStage::Writing { written, total } => {
                let percent = if *total == 0 {
                    0
                } else {
                    (written * 100) / total
                };
                format!("Writing firmware... {}%", percent)
            }
            FlashStage::Finalizing => "Finalizing flash...".into(),
            FlashStage::Restarting => "Restarting device...".into(),
            FlashStage::Complete => "Update complete!".into(),
            FlashStage::Log { message } => message.clone(),
        }
    }
}

/// ROM loader client over a transport with modem control lines.
pub struct EspFlasher<T: Transport + ControlLines> {
    transport: T,
    settings: FlashSettings,
    decoder: SlipDecoder,
}

impl<T: Transport + ControlLines> EspFlasher<T> {
    pub fn new(transport: T, settings: FlashSettings) -> Self {
        Self {
            transport,
            settings,
            decoder: SlipDecoder::new(),
        }
    }

    /// Give the transport back, e.g. to close it.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send one command and wait for its response.
    ///
    /// Responses to other opcodes (late SYNC replies) and frames that are not
    /// responses are skipped. The status bytes are left for the caller.
    async fn command(
        &mut self,
        opcode: RomOpcode,
        packet: Vec<u8>,
        timeout: Duration,
    ) -> LinkResult<RomResponse> {
        self.transport.write(&slip::encode(&packet)).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = slip::read_frame(&self.transport, &mut self.decoder, remaining).await?;
            let Some(frame) = frame else {
                return Err(LinkError::Timeout {
                    waiting_for: format!("{:?} response", opcode),
                });
            };

            match RomResponse::parse(&frame) {
                Ok(response) if response.opcode == opcode as u8 => return Ok(response),
                Ok(response) => {
                    debug!(opcode = response.opcode, "skipping response to another command")
                }
                Err(e) => debug!("skipping frame: {}", e),
            }
        }
    }

    /// Send a command and require a success status.
    async fn checked_command(
        &mut self,
        opcode: RomOpcode,
        packet: Vec<u8>,
        timeout: Duration,
    ) -> LinkResult<RomResponse> {
        let response = self.command(opcode, packet, timeout).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(LinkError::BadResponse {
                reason: format!("{:?}: {}", opcode, response.failure_reason()),
            })
        }
    }

    /// Toggle EN and GPIO0 through RTS and DTR.
    ///
    /// With `into_bootloader` GPIO0 is held low while EN is released so the
    /// chip starts in the ROM loader; otherwise EN is pulsed and the chip
    /// boots the application.
    pub async fn hard_reset(&mut self, into_bootloader: bool) -> LinkResult<()> {
        let result = if into_bootloader {
            self.reset_sequence_bootloader().await
        } else {
            self.reset_sequence_application().await
        };

        result.map_err(|e| {
            let reason = e.to_string();
            if into_bootloader {
                LinkError::EnterBootloaderFailed { reason }
            } else {
                LinkError::ResetFailed { reason }
            }
        })?;

        self.decoder.reset();
        Ok(())
    }

    async fn reset_sequence_bootloader(&self) -> Result<(), TransportError> {
        self.transport.set_dtr(false).await?;
        self.transport.set_rts(true).await?;
        tokio::time::sleep(self.settings.reset_hold()).await;
        self.transport.set_dtr(true).await?;
        self.transport.set_rts(false).await?;
        tokio::time::sleep(self.settings.boot_release()).await;
        self.transport.set_dtr(false).await
    }

    async fn reset_sequence_application(&self) -> Result<(), TransportError> {
        self.transport.set_rts(true).await?;
        tokio::time::sleep(self.settings.reset_hold()).await;
        self.transport.set_rts(false).await
    }

    /// Send SYNC until the loader answers with a success status.
    pub async fn sync(&mut self) -> LinkResult<()> {
        self.transport.clear_input().await;
        self.decoder.reset();

        let attempts = self.settings.sync_attempts.max(1);
        for attempt in 1..=attempts {
            debug!(attempt, "sending SYNC");
            match self.command(RomOpcode::Sync, build_sync(), SYNC_TIMEOUT).await {
                Ok(response) if response.is_success() => {
                    info!(attempt, "bootloader synced");
                    return Ok(());
                }
                Ok(response) => {
                    debug!(attempt, reason = %response.failure_reason(), "SYNC rejected")
                }
                Err(LinkError::Timeout { .. }) => {}
                Err(e) if e.is_disconnect() => return Err(e),
                Err(LinkError::Transport(TransportError::Cancelled)) => {
                    return Err(LinkError::Cancelled)
                }
                Err(e) => debug!(attempt, "SYNC failed: {}", e),
            }
        }

        warn!(attempts, "bootloader never answered SYNC");
        Err(LinkError::SyncFailed { attempts })
    }

    /// Read a 32-bit register.
    pub async fn read_reg(&mut self, address: u32) -> LinkResult<u32> {
        let response = self
            .checked_command(RomOpcode::ReadReg, build_read_reg(address), COMMAND_TIMEOUT)
            .await?;
        Ok(response.value)
    }

    pub async fn spi_attach(&mut self) -> LinkResult<()> {
        self.checked_command(RomOpcode::SpiAttach, build_spi_attach(), COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Switch both ends to `baud_rate`.
    pub async fn change_baud_rate(&mut self, baud_rate: u32) -> LinkResult<()> {
        self.checked_command(
            RomOpcode::ChangeBaudrate,
            build_change_baudrate(baud_rate),
            COMMAND_TIMEOUT,
        )
        .await?;
        self.transport.set_baud_rate(baud_rate).await?;
        // The loader needs a moment before it listens at the new rate
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.transport.clear_input().await;
        self.decoder.reset();
        Ok(())
    }

    /// Block size from the settings, which must be within `1..=FLASH_WRITE_SIZE`.
    fn block_size(&self) -> LinkResult<usize> {
        let block_size = self.settings.write_block_size;
        if block_size == 0 || block_size > FLASH_WRITE_SIZE {
            return Err(LinkError::InvalidFlashSettings {
                reason: format!(
                    "write block size {} is outside 1..={}",
                    block_size, FLASH_WRITE_SIZE
                ),
            });
        }
        Ok(block_size)
    }

    /// Start writing `size` bytes at `offset`. Returns the block count.
    pub async fn flash_begin(&mut self, size: usize, offset: u32) -> LinkResult<u32> {
        let block_size = self.block_size()?;
        let blocks = block_count(size, block_size) as u32;
        self.checked_command(
            RomOpcode::FlashBegin,
            build_flash_begin(size as u32, blocks, block_size as u32, offset),
            flash_begin_timeout(size),
        )
        .await?;
        Ok(blocks)
    }

    /// Write one block. Short blocks are padded with 0xFF.
    pub async fn flash_block(&mut self, block: &[u8], sequence: u32) -> LinkResult<()> {
        let block_size = self.block_size()?;
        self.checked_command(
            RomOpcode::FlashData,
            build_flash_data(block, sequence, block_size),
            COMMAND_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// End the flash. With `reboot == false` the loader stays active.
    pub async fn flash_finish(&mut self, reboot: bool) -> LinkResult<()> {
        self.checked_command(RomOpcode::FlashEnd, build_flash_end(reboot), COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Program one chunk, reporting `written` across the whole image.
    async fn flash_chunk<F>(
        &mut self,
        chunk: &FirmwareChunk,
        written: &mut usize,
        total: usize,
        on_progress: &F,
    ) -> LinkResult<()>
    where
        F: Fn(FlashStage),
    {
        on_progress(FlashStage::Erasing {
            address: chunk.address,
        });
        let blocks = self
            .flash_begin(chunk.data.len(), chunk.address)
            .await
            .map_err(|e| write_failure(0, e))?;
        on_progress(FlashStage::Log {
            message: format!(
                "Writing {} bytes at 0x{:X} in {} blocks",
                chunk.data.len(),
                chunk.address,
                blocks
            ),
        });

        let block_size = self.block_size()?;
        for (sequence, block) in chunk.data.chunks(block_size).enumerate() {
            let sequence = sequence as u32;
            self.flash_block(block, sequence)
                .await
                .map_err(|e| write_failure(sequence, e))?;

            *written += block.len();
            on_progress(FlashStage::Writing {
                written: *written,
                total,
            });
        }

        Ok(())
    }

    /// Flash every chunk of `image` and restart the device.
    ///
    /// Settings are checked before the device is touched. Failures before
    /// the first FLASH_BEGIN report [`LinkError::EnterBootloaderFailed`],
    /// [`LinkError::SyncFailed`] or [`LinkError::FlashSetupFailed`], and
    /// failures while programming report [`LinkError::FlashWriteFailed`].
    /// A failure to restart afterwards reports [`LinkError::ResetFailed`]
    /// with the firmware already written.
    pub async fn flash_image<F>(&mut self, image: &FirmwareImage, on_progress: F) -> LinkResult<()>
    where
        F: Fn(FlashStage),
    {
        let block_size = self.block_size()?;

        on_progress(FlashStage::EnteringBootloader);
        self.hard_reset(true).await?;

        on_progress(FlashStage::Syncing);
        self.sync().await?;

        match self.read_reg(CHIP_DETECT_MAGIC_REG_ADDR).await {
            Ok(magic) => on_progress(FlashStage::Log {
                message: format!("Chip magic 0x{:08X}", magic),
            }),
            Err(e) => debug!("chip detect skipped: {}", e),
        }

        if self.settings.baud_rate != ROM_BAUD_RATE {
            on_progress(FlashStage::Log {
                message: format!("Switching to {} baud", self.settings.baud_rate),
            });
            let baud_rate = self.settings.baud_rate;
            self.change_baud_rate(baud_rate)
                .await
                .map_err(setup_failure)?;
        }

        on_progress(FlashStage::Attaching);
        self.spi_attach().await.map_err(setup_failure)?;

        let total = image.total_size();
        let mut written = 0;
        for chunk in &image.chunks {
            self.flash_chunk(chunk, &mut written, total, &on_progress)
                .await?;
        }

        on_progress(FlashStage::Finalizing);
        let last_sequence = block_count(total, block_size) as u32;
        self.flash_finish(false)
            .await
            .map_err(|e| write_failure(last_sequence, e))?;

        on_progress(FlashStage::Restarting);
        self.hard_reset(false).await?;

        info!(bytes = total, chunks = image.chunks.len(), "firmware flashed");
        on_progress(FlashStage::Complete);
        Ok(())
    }
}

/// Wrap an error raised between SYNC and the first FLASH_BEGIN, keeping cancellation.
fn setup_failure(error: LinkError) -> LinkError {
    match error {
        LinkError::Cancelled | LinkError::Transport(TransportError::Cancelled) => {
            LinkError::Cancelled
        }
        e => LinkError::FlashSetupFailed {
            reason: e.to_string(),
        },
    }
}

/// Wrap an error raised while programming as a write failure, keeping cancellation.
fn write_failure(sequence: u32, error: LinkError) -> LinkError {
    match error {
        LinkError::Cancelled | LinkError::Transport(TransportError::Cancelled) => {
            LinkError::Cancelled
        }
        e @ (LinkError::FlashWriteFailed { .. } | LinkError::InvalidFlashSettings { .. }) => e,
        e => LinkError::FlashWriteFailed {
            sequence,
            reason: e.to_string(),
        },
    }
}
