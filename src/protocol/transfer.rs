//! Mode transfers: demo, save push/pull, brightness and VortexLink.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::command::{CommandChannel, OperationKind};
use super::config::{BRIGHTNESS_REPLY_OFFSET, MAX_MODES};
use super::link::DeviceLink;
use super::session::Capability;
use super::verb::Verb;
use crate::engine::{Mode, ModeEngine, ModeStore, Rgb};
use crate::error::{LinkError, LinkResult};

/// Stage of a multi-step transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferPhase {
    Start,
    /// The number of modes is known.
    Count,
    Pulling,
    Pushing,
    Finalizing,
    Done,
}

/// Progress of a transfer, reported after every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub phase: TransferPhase,
    /// Modes (or blocks) completed so far.
    pub index: usize,
    pub total: usize,
}

impl TransferProgress {
    pub fn new(phase: TransferPhase, index: usize, total: usize) -> Self {
        Self {
            phase,
            index,
            total,
        }
    }
}

/// Reply to GET_GLOBAL_BRIGHTNESS.
///
/// The reply is an engine byte stream; the brightness is the first byte after
/// its 12-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessReply {
    pub brightness: u8,
}

impl BrightnessReply {
    pub fn parse(payload: &[u8]) -> LinkResult<Self> {
        match payload.get(BRIGHTNESS_REPLY_OFFSET) {
            Some(&brightness) => Ok(Self { brightness }),
            None => Err(LinkError::ShortPayload {
                context: "brightness reply".to_string(),
                expected: BRIGHTNESS_REPLY_OFFSET + 1,
                actual: payload.len(),
            }),
        }
    }
}

impl DeviceLink {
    pub(crate) fn wrap_u32(&self, value: u32) -> Vec<u8> {
        self.inner.engine.wrap(&value.to_le_bytes())
    }

    /// Unwrap an engine stream carrying a little-endian u32.
    pub(crate) fn unwrap_u32(&self, payload: &[u8], context: &str) -> LinkResult<u32> {
        let raw = self.inner.engine.unwrap(payload).map_err(|e| {
            debug!("{} rejected: {}", context, e);
            LinkError::IntegrityCheckFailed {
                context: context.to_string(),
            }
        })?;
        match raw.get(..4) {
            Some(bytes) => Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            None => Err(LinkError::ShortPayload {
                context: context.to_string(),
                expected: 4,
                actual: raw.len(),
            }),
        }
    }

    /// Show `mode` on the device without saving it.
    pub async fn demo_mode(&self, mode: &Mode) -> LinkResult<()> {
        let (_guard, transport) = self.begin_operation(OperationKind::DemoMode).await?;
        let channel = self.channel(transport.as_ref());

        let result = async {
            channel.request(Verb::DemoMode).await?;
            channel.send_frame(&mode.stream).await?;
            channel.expect_verb(Verb::DemoModeAck).await
        }
        .await;
        self.finish(result).await
    }

    /// Show a solid colour on the device.
    pub async fn demo_color(&self, color: Rgb) -> LinkResult<()> {
        let mode = self
            .inner
            .engine
            .solid_color_mode(color)
            .map_err(LinkError::Engine)?;
        self.demo_mode(&mode).await
    }

    /// Return the device to its saved modes.
    pub async fn clear_demo(&self) -> LinkResult<()> {
        let (_guard, transport) = self.begin_operation(OperationKind::ClearDemo).await?;
        let channel = self.channel(transport.as_ref());

        let result = async {
            channel.send_verb(Verb::ClearDemo).await?;
            channel.expect_verb(Verb::ClearDemoAck).await
        }
        .await;
        self.finish(result).await
    }

    /// Replace the device's saved modes with `store`.
    ///
    /// Uses the per-mode streamed form when the firmware supports it.
    pub async fn push_to_device<P>(&self, store: &ModeStore, mut progress: P) -> LinkResult<()>
    where
        P: FnMut(TransferProgress) + Send,
    {
        let (_guard, transport) = self.begin_operation(OperationKind::PushModes).await?;
        let channel = self.channel(transport.as_ref());
        let streamed = self.capability() == Some(Capability::StreamedTransfer);

        progress(TransferProgress::new(TransferPhase::Start, 0, store.len()));
        let result = if streamed {
            self.push_each_mode(channel, store, &mut progress).await
        } else {
            self.push_save(channel, store, &mut progress).await
        };
        if result.is_ok() {
            info!(modes = store.len(), streamed, "pushed modes");
        }
        self.finish(result).await
    }

    async fn push_save<P>(
        &self,
        channel: CommandChannel<'_>,
        store: &ModeStore,
        progress: &mut P,
    ) -> LinkResult<()>
    where
        P: FnMut(TransferProgress) + Send,
    {
        let total = store.len();
        let save = self
            .inner
            .engine
            .pack_save(store)
            .map_err(LinkError::Engine)?;

        channel.request(Verb::PushModes).await?;
        progress(TransferProgress::new(TransferPhase::Pushing, 0, total));
        channel.send_frame(&save).await?;
        progress(TransferProgress::new(TransferPhase::Finalizing, total, total));
        channel.expect_verb(Verb::PushModesAck).await?;
        progress(TransferProgress::new(TransferPhase::Done, total, total));
        Ok(())
    }

    async fn push_each_mode<P>(
        &self,
        channel: CommandChannel<'_>,
        store: &ModeStore,
        progress: &mut P,
    ) -> LinkResult<()>
    where
        P: FnMut(TransferProgress) + Send,
    {
        let total = store.len();

        channel.request(Verb::PushEachMode).await?;
        channel.send_frame(&self.wrap_u32(total as u32)).await?;
        channel.expect_verb(Verb::PushEachModeAck).await?;
        progress(TransferProgress::new(TransferPhase::Count, 0, total));

        for (i, mode) in store.modes.iter().enumerate() {
            channel.send_frame(&mode.stream).await?;
            channel.expect_verb(Verb::PushEachModeAck).await?;
            progress(TransferProgress::new(TransferPhase::Pushing, i + 1, total));
        }

        progress(TransferProgress::new(TransferPhase::Finalizing, total, total));
        channel.send_verb(Verb::PushEachModeDone).await?;
        progress(TransferProgress::new(TransferPhase::Done, total, total));
        Ok(())
    }

    /// Replace `store` with the device's saved modes.
    ///
    /// `store` is only modified once every mode has arrived; a failed or
    /// cancelled pull leaves it untouched.
    pub async fn pull_from_device<P>(&self, store: &mut ModeStore, mut progress: P) -> LinkResult<()>
    where
        P: FnMut(TransferProgress) + Send,
    {
        let (_guard, transport) = self.begin_operation(OperationKind::PullModes).await?;
        let channel = self.channel(transport.as_ref());
        let streamed = self.capability() == Some(Capability::StreamedTransfer);

        progress(TransferProgress::new(TransferPhase::Start, 0, 0));
        let result = if streamed {
            self.pull_each_mode(channel, &mut progress).await
        } else {
            self.pull_save(channel, &mut progress).await
        };

        let result = result.map(|pulled| {
            info!(modes = pulled.len(), streamed, "pulled modes");
            *store = pulled;
            progress(TransferProgress::new(TransferPhase::Done, store.len(), store.len()));
        });
        self.finish(result).await
    }

    async fn pull_save<P>(&self, channel: CommandChannel<'_>, progress: &mut P) -> LinkResult<ModeStore>
    where
        P: FnMut(TransferProgress) + Send,
    {
        channel.send_verb(Verb::PullModes).await?;
        let save = channel.read_frame().await?;
        progress(TransferProgress::new(TransferPhase::Pulling, 0, 0));

        channel.send_verb(Verb::PullModesDone).await?;
        channel.expect_verb(Verb::PullModesAck).await?;

        let pulled = self
            .inner
            .engine
            .unpack_save(&save)
            .map_err(LinkError::Engine)?;
        progress(TransferProgress::new(
            TransferPhase::Finalizing,
            pulled.len(),
            pulled.len(),
        ));
        Ok(pulled)
    }

    async fn pull_each_mode<P>(
        &self,
        channel: CommandChannel<'_>,
        progress: &mut P,
    ) -> LinkResult<ModeStore>
    where
        P: FnMut(TransferProgress) + Send,
    {
        channel.send_verb(Verb::PullEachMode).await?;
        let count = channel.read_frame().await?;
        let total = self.unwrap_u32(&count, "mode count")? as usize;
        if total > MAX_MODES {
            return Err(LinkError::TooManyModes {
                count: total,
                max: MAX_MODES,
            });
        }
        channel.send_verb(Verb::PullEachModeAck).await?;
        progress(TransferProgress::new(TransferPhase::Count, 0, total));

        let mut modes = Vec::new();
        for i in 0..total {
            let stream = channel.read_frame().await?;
            modes.push(Mode::new(stream));
            channel.send_verb(Verb::PullEachModeAck).await?;
            progress(TransferProgress::new(TransferPhase::Pulling, i + 1, total));
        }

        progress(TransferProgress::new(TransferPhase::Finalizing, total, total));
        channel.expect_verb(Verb::PullEachModeDone).await?;
        Ok(ModeStore::new(modes))
    }

    /// Set the global brightness (0-255).
    pub async fn set_brightness(&self, brightness: u8) -> LinkResult<()> {
        let (_guard, transport) = self.begin_operation(OperationKind::SetBrightness).await?;
        let channel = self
            .channel(transport.as_ref())
            .with_timeout(self.inner.settings.brightness_timeout());

        let result = async {
            channel.request(Verb::SetGlobalBrightness).await?;
            channel
                .send_frame(&self.inner.engine.wrap(&[brightness]))
                .await?;
            channel.expect_verb(Verb::SetGlobalBrightnessAck).await
        }
        .await;
        self.finish(result).await
    }

    /// Read the global brightness.
    pub async fn get_brightness(&self) -> LinkResult<u8> {
        let (_guard, transport) = self.begin_operation(OperationKind::GetBrightness).await?;
        let channel = self
            .channel(transport.as_ref())
            .with_timeout(self.inner.settings.brightness_timeout());

        let result: LinkResult<u8> = async {
            channel.send_verb(Verb::GetGlobalBrightness).await?;
            let reply = channel.read_frame().await?;
            Ok(BrightnessReply::parse(&reply)?.brightness)
        }
        .await;
        self.finish(result).await
    }

    /// Send `mode` out of the device's IR/VortexLink emitter.
    pub async fn transmit_vl(&self, mode: &Mode) -> LinkResult<()> {
        let (_guard, transport) = self.begin_operation(OperationKind::TransmitVl).await?;
        let channel = self.channel(transport.as_ref());

        let result = async {
            channel.request(Verb::TransmitVl).await?;
            channel.send_frame(&mode.stream).await?;
            channel.expect_verb(Verb::TransmitVlAck).await
        }
        .await;
        self.finish(result).await
    }

    /// Wait for the device to receive a mode over VortexLink.
    pub async fn listen_vl(&self) -> LinkResult<Mode> {
        let (_guard, transport) = self.begin_operation(OperationKind::ListenVl).await?;
        let channel = self.channel(transport.as_ref());

        let result: LinkResult<Mode> = async {
            channel.send_verb(Verb::ListenVl).await?;
            let stream = channel
                .with_timeout(self.inner.settings.listen_vl_timeout())
                .read_frame()
                .await?;
            channel.send_verb(Verb::ListenVlAck).await?;
            Ok(Mode::new(stream))
        }
        .await;
        self.finish(result).await
    }

    /// Read one saved mode by index.
    pub async fn pull_single_mode(&self, index: u32) -> LinkResult<Mode> {
        let (_guard, transport) = self.begin_operation(OperationKind::PullSingleMode).await?;
        let channel = self.channel(transport.as_ref());

        let result: LinkResult<Mode> = async {
            channel.request(Verb::PullSingleMode).await?;
            channel.send_frame(&self.wrap_u32(index)).await?;
            let stream = channel.read_frame().await?;
            channel.send_verb(Verb::PullSingleModeAck).await?;
            Ok(Mode::new(stream))
        }
        .await;
        self.finish(result).await
    }

    /// Overwrite one saved mode by index.
    pub async fn push_single_mode(&self, index: u32, mode: &Mode) -> LinkResult<()> {
        let (_guard, transport) = self.begin_operation(OperationKind::PushSingleMode).await?;
        let channel = self.channel(transport.as_ref());

        let result = async {
            channel.request(Verb::PushSingleMode).await?;
            channel.send_frame(&self.wrap_u32(index)).await?;
            channel.expect_verb(Verb::Ready).await?;
            channel.send_frame(&mode.stream).await?;
            channel.expect_verb(Verb::PushSingleModeAck).await
        }
        .await;
        self.finish(result).await
    }
}
