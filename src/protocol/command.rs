//! Request/acknowledgement exchanges and the single-flight marker.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::frame::{encode_framed, read_framed};
use super::verb::Verb;
use crate::error::{LinkError, LinkResult};
use crate::settings::AckMismatchPolicy;
use crate::transport::Transport;

/// Operations that hold the link exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Connect,
    DemoMode,
    ClearDemo,
    PushModes,
    PullModes,
    SetBrightness,
    GetBrightness,
    TransmitVl,
    ListenVl,
    PullSingleMode,
    PushSingleMode,
    ConnectChromalink,
    PullDuoModes,
    PushDuoModes,
    WriteDuoHeader,
    FlashDuoFirmware,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Connect => "connecting",
            OperationKind::DemoMode => "demoing a mode",
            OperationKind::ClearDemo => "clearing the demo",
            OperationKind::PushModes => "pushing modes",
            OperationKind::PullModes => "pulling modes",
            OperationKind::SetBrightness => "setting brightness",
            OperationKind::GetBrightness => "reading brightness",
            OperationKind::TransmitVl => "transmitting a mode",
            OperationKind::ListenVl => "listening for a mode",
            OperationKind::PullSingleMode => "pulling a mode",
            OperationKind::PushSingleMode => "pushing a mode",
            OperationKind::ConnectChromalink => "connecting to a Duo",
            OperationKind::PullDuoModes => "pulling Duo modes",
            OperationKind::PushDuoModes => "pushing Duo modes",
            OperationKind::WriteDuoHeader => "writing the Duo header",
            OperationKind::FlashDuoFirmware => "flashing Duo firmware",
        };
        f.write_str(name)
    }
}

/// Whether an operation currently owns the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Idle,
    InFlight(OperationKind),
}

impl OperationState {
    /// Claim the link for `kind`, or report what already holds it.
    pub fn try_begin(&mut self, kind: OperationKind) -> Result<(), OperationKind> {
        match *self {
            OperationState::Idle => {
                *self = OperationState::InFlight(kind);
                Ok(())
            }
            OperationState::InFlight(current) => Err(current),
        }
    }

    pub fn finish(&mut self) {
        *self = OperationState::Idle;
    }

    pub fn current(&self) -> Option<OperationKind> {
        match self {
            OperationState::Idle => None,
            OperationState::InFlight(kind) => Some(*kind),
        }
    }
}

/// Verb and frame exchanges over a transport owned by one operation.
#[derive(Clone, Copy)]
pub struct CommandChannel<'a> {
    transport: &'a dyn Transport,
    timeout: Duration,
    policy: AckMismatchPolicy,
}

impl<'a> CommandChannel<'a> {
    pub fn new(transport: &'a dyn Transport, timeout: Duration, policy: AckMismatchPolicy) -> Self {
        Self {
            transport,
            timeout,
            policy,
        }
    }

    /// Same channel with a different reply deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub async fn send_verb(&self, verb: Verb) -> LinkResult<()> {
        trace!(%verb, "send");
        self.transport.write(&[verb.code()]).await?;
        Ok(())
    }

    pub async fn send_frame(&self, payload: &[u8]) -> LinkResult<()> {
        trace!(len = payload.len(), "send frame");
        self.transport.write(&encode_framed(payload)).await?;
        Ok(())
    }

    /// Wait for `expected`.
    ///
    /// Under the strict policy any other byte fails the exchange. Under the
    /// lenient policy stray bytes are logged and skipped until the deadline.
    pub async fn expect_verb(&self, expected: Verb) -> LinkResult<()> {
        let wait = async {
            loop {
                let byte = self.transport.read_byte().await?;
                if byte == expected.code() {
                    return Ok(());
                }
                match self.policy {
                    AckMismatchPolicy::Strict => {
                        warn!(%expected, received = byte, "unexpected reply");
                        return Err(LinkError::AckMismatch {
                            expected,
                            received: byte,
                        });
                    }
                    AckMismatchPolicy::Lenient => {
                        warn!(%expected, received = byte, "ignoring unexpected reply");
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout {
                waiting_for: expected.to_string(),
            }),
        }
    }

    /// Wait for one framed reply.
    pub async fn read_frame(&self) -> LinkResult<Vec<u8>> {
        read_framed(self.transport, self.timeout).await
    }

    /// Send `verb` and wait for the device to answer `Ready`.
    pub async fn request(&self, verb: Verb) -> LinkResult<()> {
        self.send_verb(verb).await?;
        self.expect_verb(Verb::Ready).await
    }
}
