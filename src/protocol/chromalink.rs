//! Chromalink: reaching a Duo wired to the connected device.
//!
//! The connected device relays each request to the Duo. Every payload the
//! Duo produces is an engine stream whose checksum is verified here; a bad
//! checksum or a short header always fails the operation.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::command::{CommandChannel, OperationKind};
use super::config::{DUO_FIRMWARE_BLOCK_SIZE, DUO_FLASH_ERASE_TIMEOUT, DUO_HEADER_SIZE};
use super::link::DeviceLink;
use super::transfer::{TransferPhase, TransferProgress};
use super::verb::Verb;
use crate::engine::{Mode, ModeEngine, ModeStore};
use crate::error::{LinkError, LinkResult};

/// Header stored at the start of a Duo's save area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuoHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u8,
    pub flags: u8,
    pub brightness: u8,
    pub num_modes: u8,
}

impl DuoHeader {
    /// Parse the raw (unwrapped) header bytes.
    pub fn from_bytes(raw: &[u8]) -> LinkResult<Self> {
        if raw.len() < DUO_HEADER_SIZE {
            return Err(LinkError::ShortPayload {
                context: "Duo header".to_string(),
                expected: DUO_HEADER_SIZE,
                actual: raw.len(),
            });
        }
        Ok(Self {
            version_major: raw[0],
            version_minor: raw[1],
            version_build: raw[2],
            flags: raw[3],
            brightness: raw[4],
            num_modes: raw[5],
        })
    }

    pub fn to_bytes(&self) -> [u8; DUO_HEADER_SIZE] {
        [
            self.version_major,
            self.version_minor,
            self.version_build,
            self.flags,
            self.brightness,
            self.num_modes,
        ]
    }

    pub fn version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_build
        )
    }
}

impl DeviceLink {
    fn verify_duo_stream(&self, stream: &[u8], context: &str) -> LinkResult<Vec<u8>> {
        self.inner.engine.unwrap(stream).map_err(|e| {
            debug!("{} failed verification: {}", context, e);
            LinkError::IntegrityCheckFailed {
                context: context.to_string(),
            }
        })
    }

    async fn read_duo_header(&self, channel: CommandChannel<'_>) -> LinkResult<DuoHeader> {
        channel.send_verb(Verb::PullChromaHdr).await?;
        let stream = channel.read_frame().await?;
        let raw = self.verify_duo_stream(&stream, "Duo header")?;
        let header = DuoHeader::from_bytes(&raw)?;
        channel.send_verb(Verb::PullChromaHdrAck).await?;
        Ok(header)
    }

    async fn send_duo_header(
        &self,
        channel: CommandChannel<'_>,
        header: &DuoHeader,
    ) -> LinkResult<()> {
        channel.request(Verb::PushChromaHdr).await?;
        channel
            .send_frame(&self.inner.engine.wrap(&header.to_bytes()))
            .await?;
        channel.expect_verb(Verb::PushChromaHdrAck).await
    }

    /// Read the header of the attached Duo.
    pub async fn connect_chromalink(&self) -> LinkResult<DuoHeader> {
        let (_guard, transport) = self
            .begin_operation(OperationKind::ConnectChromalink)
            .await?;
        let channel = self.channel(transport.as_ref());

        let result = self.read_duo_header(channel).await;
        if let Ok(header) = &result {
            info!(
                version = %header.version(),
                modes = header.num_modes,
                "Duo attached"
            );
        }
        self.finish(result).await
    }

    /// Replace `store` with the modes saved on the Duo.
    ///
    /// Like the device pull, `store` is untouched unless every mode arrives.
    pub async fn pull_duo_modes<P>(
        &self,
        header: &DuoHeader,
        store: &mut ModeStore,
        mut progress: P,
    ) -> LinkResult<()>
    where
        P: FnMut(TransferProgress) + Send,
    {
        let (_guard, transport) = self.begin_operation(OperationKind::PullDuoModes).await?;
        let channel = self.channel(transport.as_ref());
        let total = header.num_modes as usize;

        progress(TransferProgress::new(TransferPhase::Count, 0, total));
        let result: LinkResult<Vec<Mode>> = async {
            let mut modes = Vec::with_capacity(total);
            for i in 0..total {
                channel.request(Verb::PullChromaMode).await?;
                channel.send_frame(&self.wrap_u32(i as u32)).await?;
                let stream = channel.read_frame().await?;
                self.verify_duo_stream(&stream, "Duo mode")?;
                channel.send_verb(Verb::PullChromaModeAck).await?;
                modes.push(Mode::new(stream));
                progress(TransferProgress::new(TransferPhase::Pulling, i + 1, total));
            }
            Ok(modes)
        }
        .await;

        let result = result.map(|modes| {
            store.modes = modes;
            progress(TransferProgress::new(TransferPhase::Done, total, total));
        });
        self.finish(result).await
    }

    /// Write `store` to the Duo, then update its header mode count.
    pub async fn push_duo_modes<P>(
        &self,
        header: &DuoHeader,
        store: &ModeStore,
        mut progress: P,
    ) -> LinkResult<()>
    where
        P: FnMut(TransferProgress) + Send,
    {
        let (_guard, transport) = self.begin_operation(OperationKind::PushDuoModes).await?;
        let channel = self.channel(transport.as_ref());
        let total = store.len();

        progress(TransferProgress::new(TransferPhase::Count, 0, total));
        let result: LinkResult<()> = async {
            let num_modes = u8::try_from(total).map_err(|_| {
                LinkError::Engine(format!("a Duo holds at most 255 modes, got {}", total))
            })?;

            for (i, mode) in store.modes.iter().enumerate() {
                channel.request(Verb::PushChromaMode).await?;
                channel.send_frame(&self.wrap_u32(i as u32)).await?;
                channel.expect_verb(Verb::Ready).await?;
                channel.send_frame(&mode.stream).await?;
                channel.expect_verb(Verb::PushChromaModeAck).await?;
                progress(TransferProgress::new(TransferPhase::Pushing, i + 1, total));
            }

            progress(TransferProgress::new(TransferPhase::Finalizing, total, total));
            let header = DuoHeader {
                num_modes,
                ..*header
            };
            self.send_duo_header(channel, &header).await?;
            progress(TransferProgress::new(TransferPhase::Done, total, total));
            Ok(())
        }
        .await;
        self.finish(result).await
    }

    /// Overwrite the Duo header (brightness, flags, mode count).
    pub async fn write_duo_header(&self, header: &DuoHeader) -> LinkResult<()> {
        let (_guard, transport) = self.begin_operation(OperationKind::WriteDuoHeader).await?;
        let channel = self.channel(transport.as_ref());

        let result = self.send_duo_header(channel, header).await;
        self.finish(result).await
    }

    /// Stream a firmware image to the Duo in 128-byte blocks.
    pub async fn flash_duo_firmware<P>(&self, image: &[u8], mut progress: P) -> LinkResult<()>
    where
        P: FnMut(TransferProgress) + Send,
    {
        let (_guard, transport) = self
            .begin_operation(OperationKind::FlashDuoFirmware)
            .await?;
        let channel = self.channel(transport.as_ref());
        let total = image.len().div_ceil(DUO_FIRMWARE_BLOCK_SIZE);

        progress(TransferProgress::new(TransferPhase::Start, 0, total));
        let result: LinkResult<()> = async {
            channel.request(Verb::FlashFirmware).await?;
            channel.send_frame(&self.wrap_u32(image.len() as u32)).await?;
            channel
                .with_timeout(DUO_FLASH_ERASE_TIMEOUT)
                .expect_verb(Verb::FlashFirmwareAck)
                .await?;

            for (i, block) in image.chunks(DUO_FIRMWARE_BLOCK_SIZE).enumerate() {
                channel.send_frame(block).await?;
                channel.expect_verb(Verb::FlashFirmwareAck).await?;
                progress(TransferProgress::new(TransferPhase::Pushing, i + 1, total));
            }

            channel.send_verb(Verb::FlashFirmwareDone).await?;
            progress(TransferProgress::new(TransferPhase::Done, total, total));
            Ok(())
        }
        .await;
        if result.is_ok() {
            info!(bytes = image.len(), blocks = total, "Duo firmware sent");
        }
        self.finish(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LinkSettings;
    use crate::test_helpers::{FakeVortexDevice, ScriptedTransport, TestEngine};
    use crate::transport::Transport;
    use std::sync::Arc;

    fn duo_header(num_modes: u8) -> DuoHeader {
        DuoHeader {
            version_major: 1,
            version_minor: 3,
            version_build: 7,
            flags: 0,
            brightness: 180,
            num_modes,
        }
    }

    fn duo_modes(count: usize) -> Vec<Mode> {
        (0..count)
            .map(|i| Mode::new(TestEngine.wrap(&[0xD0 + i as u8; 16])))
            .collect()
    }

    async fn connected(device: FakeVortexDevice) -> DeviceLink {
        let link = DeviceLink::new(LinkSettings::default(), Arc::new(TestEngine));
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::with_device(device));
        link.connect(transport).await.unwrap();
        link
    }

    #[test]
    fn test_header_layout() {
        let header = duo_header(4);
        assert_eq!(header.to_bytes(), [1, 3, 7, 0, 180, 4]);
        assert_eq!(DuoHeader::from_bytes(&header.to_bytes()).unwrap(), header);
        assert_eq!(header.version(), "1.3.7");
    }

    #[test]
    fn test_short_header_rejected() {
        let err = DuoHeader::from_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::ShortPayload {
                expected: 6,
                actual: 3,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_chromalink_reads_header() {
        let device = FakeVortexDevice::new("Spark", "1.4.0").with_duo(duo_header(2), duo_modes(2));
        let link = connected(device).await;

        assert_eq!(link.connect_chromalink().await.unwrap(), duo_header(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_header_is_integrity_failure() {
        let device = FakeVortexDevice::new("Spark", "1.4.0")
            .with_duo(duo_header(2), duo_modes(2))
            .corrupt_duo_payloads();
        let link = connected(device).await;

        let err = link.connect_chromalink().await.unwrap_err();
        assert!(matches!(err, LinkError::IntegrityCheckFailed { .. }));
        assert_eq!(link.current_operation(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_and_push_duo_modes() {
        let device = FakeVortexDevice::new("Spark", "1.4.0").with_duo(duo_header(3), duo_modes(3));
        let state = device.state();
        let link = connected(device).await;

        let header = link.connect_chromalink().await.unwrap();
        let mut store = ModeStore::default();
        link.pull_duo_modes(&header, &mut store, |_| {}).await.unwrap();
        assert_eq!(store.modes, duo_modes(3));

        store.modes.truncate(2);
        let mut pushed = Vec::new();
        link.push_duo_modes(&header, &store, |p| pushed.push(p.phase))
            .await
            .unwrap();

        let device = state.lock().unwrap();
        assert_eq!(&device.duo_modes[..2], &store.modes[..]);
        assert_eq!(device.duo_header.map(|h| h.num_modes), Some(2));
        assert_eq!(pushed.last(), Some(&TransferPhase::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_duo_mode_leaves_store_untouched() {
        let device = FakeVortexDevice::new("Spark", "1.4.0")
            .with_duo(duo_header(2), duo_modes(2))
            .corrupt_duo_payloads();
        let link = connected(device).await;

        let original = ModeStore::new(duo_modes(1));
        let mut store = original.clone();
        let err = link
            .pull_duo_modes(&duo_header(2), &mut store, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, LinkError::IntegrityCheckFailed { .. }));
        assert_eq!(store, original);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_duo_header() {
        let device = FakeVortexDevice::new("Spark", "1.4.0").with_duo(duo_header(1), duo_modes(1));
        let state = device.state();
        let link = connected(device).await;

        let mut header = duo_header(1);
        header.brightness = 42;
        link.write_duo_header(&header).await.unwrap();

        assert_eq!(state.lock().unwrap().duo_header, Some(header));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_duo_firmware_in_blocks() {
        let device = FakeVortexDevice::new("Spark", "1.4.0").with_duo(duo_header(0), Vec::new());
        let state = device.state();
        let link = connected(device).await;
        let image: Vec<u8> = (0..300u32).map(|i| i as u8).collect();

        let mut blocks = Vec::new();
        link.flash_duo_firmware(&image, |p| {
            if p.phase == TransferPhase::Pushing {
                blocks.push(p.index);
            }
        })
        .await
        .unwrap();

        assert_eq!(blocks, vec![1, 2, 3]);
        assert_eq!(state.lock().unwrap().duo_firmware, image);
    }
}
