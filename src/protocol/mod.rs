//! Verb protocol spoken by lightshow controllers.
//!
//! # Protocol Overview
//!
//! 1. **Handshake** - Send HELLO until the device prints its greeting
//! 2. **Commands** - One verb byte, optionally a size-prefixed frame, then
//!    an acknowledgement verb or a framed reply
//! 3. **Transfers** - Saved modes move as one save buffer (legacy firmware)
//!    or one frame per mode (1.3.0 and later)
//! 4. **Chromalink** - The same exchanges relayed to an attached Duo
//!
//! Only one command runs at a time. Between commands a background listener
//! drains stray bytes and notices the device going away.

pub mod chromalink;
pub mod command;
pub mod config;
pub mod frame;
pub mod link;
pub mod session;
pub mod transfer;
pub mod verb;

pub use chromalink::DuoHeader;
pub use command::{OperationKind, OperationState};
pub use frame::{encode_framed, read_framed, FrameDecoder};
pub use link::DeviceLink;
pub use session::{Capability, DeviceIdentity, DeviceSession, DeviceVersion, SessionState};
pub use transfer::{BrightnessReply, TransferPhase, TransferProgress};
pub use verb::Verb;
