//! Device session: greeting handshake, identity and lifecycle.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::STREAMED_TRANSFER_MIN_VERSION;
use super::verb::Verb;
use crate::error::{LinkError, LinkResult};
use crate::transport::{Transport, TransportKind};

/// Greeting bytes kept while waiting for a match.
const GREETING_BUFFER_LIMIT: usize = 512;

/// Semantic version reported in the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl DeviceVersion {
    pub fn new(major: u32, minor: u32, build: u32) -> Self {
        Self { major, minor, build }
    }
}

impl fmt::Display for DeviceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// How saved modes move between host and device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// One framed save buffer per transfer.
    LegacyTransfer,
    /// One framed buffer per mode, acknowledged individually.
    StreamedTransfer,
}

impl Capability {
    /// Capability negotiated from the firmware version.
    pub fn for_version(version: DeviceVersion) -> Self {
        let (major, minor, build) = STREAMED_TRANSFER_MIN_VERSION;
        if version >= DeviceVersion::new(major, minor, build) {
            Capability::StreamedTransfer
        } else {
            Capability::LegacyTransfer
        }
    }
}

/// Identity announced by the device greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub name: String,
    pub version: DeviceVersion,
    /// Build date text as printed by the device.
    pub build_date: String,
    /// Build date, when the text is a recognisable date.
    pub build_day: Option<NaiveDate>,
}

impl DeviceIdentity {
    pub fn capability(&self) -> Capability {
        Capability::for_version(self.version)
    }
}

/// Session lifecycle.
///
/// `Connecting → Listening → Active → Disconnected`, with
/// `Listening → Connecting` on each handshake retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Connecting,
    Listening,
    Active,
    Disconnected,
}

/// State of the current (or last) connection.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    state: SessionState,
    transport_kind: Option<TransportKind>,
    identity: Option<DeviceIdentity>,
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            transport_kind: None,
            identity: None,
        }
    }
}

impl DeviceSession {
    /// Start a fresh connection attempt, discarding the previous session.
    pub fn begin_connect(&mut self, kind: TransportKind) {
        *self = Self {
            state: SessionState::Connecting,
            transport_kind: Some(kind),
            identity: None,
        };
    }

    pub fn listening(&mut self) {
        self.state = SessionState::Listening;
    }

    pub fn retrying(&mut self) {
        if self.state == SessionState::Listening {
            self.state = SessionState::Connecting;
        }
    }

    pub fn activate(&mut self, identity: DeviceIdentity) {
        self.state = SessionState::Active;
        self.identity = Some(identity);
    }

    /// Mark the session gone and clear its identity.
    pub fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.identity = None;
    }

    /// Forget everything, including the transport kind.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport_kind
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn capability(&self) -> Option<Capability> {
        self.identity.as_ref().map(DeviceIdentity::capability)
    }
}

fn greeting_regex() -> Option<&'static Regex> {
    static GREETING: OnceLock<Option<Regex>> = OnceLock::new();
    GREETING
        .get_or_init(|| {
            // "== Name v1.2.3 (built Jan  1 2024) ==", patch and build part optional
            Regex::new(
                r"==\s*(.+?)\s+v(\d+)\.(\d+)(?:\.(\d+))?(?:\s*\(\s*built\s+(.+?)\s*\))?\s*==",
            )
            .ok()
        })
        .as_ref()
}

/// Parse a device build date such as `Jan  1 2024`.
pub fn parse_build_date(text: &str) -> Option<NaiveDate> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDate::parse_from_str(&normalized, "%b %d %Y").ok()
}

/// Find a greeting anywhere in `text`.
pub fn parse_greeting(text: &str) -> Option<DeviceIdentity> {
    let captures = greeting_regex()?.captures(text)?;

    let number = |i: usize| -> Option<u32> {
        match captures.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    let build_date = captures
        .get(5)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    Some(DeviceIdentity {
        name: captures.get(1)?.as_str().trim().to_string(),
        version: DeviceVersion::new(number(2)?, number(3)?, number(4)?),
        build_day: parse_build_date(&build_date),
        build_date,
    })
}

/// Prompt the device with HELLO until it greets, or give up.
///
/// Each attempt listens for `interval`. Bytes are kept across attempts so a
/// greeting split over an attempt boundary still matches.
pub async fn perform_handshake(
    transport: &dyn Transport,
    session: &std::sync::Mutex<DeviceSession>,
    max_attempts: u32,
    interval: Duration,
) -> LinkResult<DeviceIdentity> {
    let mut received: Vec<u8> = Vec::new();

    for attempt in 1..=max_attempts {
        set_state(session, DeviceSession::listening);
        debug!(attempt, max_attempts, "sending HELLO");
        transport.write(&[Verb::Hello.code()]).await?;

        let deadline = tokio::time::Instant::now() + interval;
        loop {
            let byte = match tokio::time::timeout_at(deadline, transport.read_byte()).await {
                Ok(byte) => byte?,
                Err(_) => break,
            };

            received.push(byte);
            if received.len() > GREETING_BUFFER_LIMIT {
                received.drain(..received.len() - GREETING_BUFFER_LIMIT);
            }

            if byte == b'=' {
                if let Some(identity) = parse_greeting(&String::from_utf8_lossy(&received)) {
                    info!(
                        name = %identity.name,
                        version = %identity.version,
                        attempt,
                        "device greeted"
                    );
                    return Ok(identity);
                }
            }
        }

        set_state(session, DeviceSession::retrying);
    }

    Err(LinkError::HandshakeTimeout {
        attempts: max_attempts,
    })
}

fn set_state(session: &std::sync::Mutex<DeviceSession>, f: fn(&mut DeviceSession)) {
    if let Ok(mut session) = session.lock() {
        f(&mut session);
    }
}
