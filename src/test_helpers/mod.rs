//! Test doubles: a scripted transport, a fake lightshow device, a fake ESP32
//! ROM loader and a checksumming stand-in for the pattern engine.

mod bootloader;
mod device;
mod engine;
mod temp;
mod transport;

pub use bootloader::{BootloaderState, FakeEspBootloader, FlashBeginRecord, FAKE_CHIP_MAGIC};
pub use device::{FakeDeviceState, FakeVortexDevice};
pub use engine::TestEngine;
pub use temp::TestContext;
pub use transport::ScriptedTransport;
