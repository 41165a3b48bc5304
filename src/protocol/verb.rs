//! Single-byte command verbs.

use std::fmt;

/// Command and acknowledgement verbs exchanged with a device.
///
/// Every verb travels as one ASCII byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Verb {
    Hello = b'@',
    Ready = b'a',
    PullModes = b'b',
    PullModesDone = b'c',
    PullModesAck = b'd',
    PushModes = b'e',
    PushModesAck = b'f',
    DemoMode = b'g',
    DemoModeAck = b'h',
    ClearDemo = b'i',
    ClearDemoAck = b'j',
    Goodbye = b'k',
    TransmitVl = b'l',
    TransmitVlAck = b'm',
    ListenVl = b'n',
    ListenVlAck = b'o',
    PullChromaHdr = b'p',
    PullChromaHdrAck = b'q',
    PushChromaHdr = b'r',
    PushChromaHdrAck = b's',
    PullChromaMode = b't',
    PullChromaModeAck = b'u',
    PushChromaMode = b'v',
    PushChromaModeAck = b'w',
    PullSingleMode = b'x',
    PullSingleModeAck = b'y',
    PushSingleMode = b'z',
    PushSingleModeAck = b'A',
    PullEachMode = b'B',
    PullEachModeAck = b'C',
    PullEachModeDone = b'D',
    PushEachMode = b'E',
    PushEachModeAck = b'F',
    PushEachModeDone = b'G',
    FlashFirmware = b'H',
    FlashFirmwareAck = b'I',
    FlashFirmwareDone = b'J',
    SetGlobalBrightness = b'K',
    SetGlobalBrightnessAck = b'L',
    GetGlobalBrightness = b'M',
}

impl Verb {
    const ALL: [Verb; 40] = [
        Verb::Hello,
        Verb::Ready,
        Verb::PullModes,
        Verb::PullModesDone,
        Verb::PullModesAck,
        Verb::PushModes,
        Verb::PushModesAck,
        Verb::DemoMode,
        Verb::DemoModeAck,
        Verb::ClearDemo,
        Verb::ClearDemoAck,
        Verb::Goodbye,
        Verb::TransmitVl,
        Verb::TransmitVlAck,
        Verb::ListenVl,
        Verb::ListenVlAck,
        Verb::PullChromaHdr,
        Verb::PullChromaHdrAck,
        Verb::PushChromaHdr,
        Verb::PushChromaHdrAck,
        Verb::PullChromaMode,
        Verb::PullChromaModeAck,
        Verb::PushChromaMode,
        Verb::PushChromaModeAck,
        Verb::PullSingleMode,
        Verb::PullSingleModeAck,
        Verb::PushSingleMode,
        Verb::PushSingleModeAck,
        Verb::PullEachMode,
        Verb::PullEachModeAck,
        Verb::PullEachModeDone,
        Verb::PushEachMode,
        Verb::PushEachModeAck,
        Verb::PushEachModeDone,
        Verb::FlashFirmware,
        Verb::FlashFirmwareAck,
        Verb::FlashFirmwareDone,
        Verb::SetGlobalBrightness,
        Verb::SetGlobalBrightnessAck,
        Verb::GetGlobalBrightness,
    ];

    /// Wire byte for this verb.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.code() == byte)
    }

    /// Protocol name, as printed in device logs.
    pub fn name(self) -> &'static str {
        match self {
            Verb::Hello => "HELLO",
            Verb::Ready => "READY",
            Verb::PullModes => "PULL_MODES",
            Verb::PullModesDone => "PULL_MODES_DONE",
            Verb::PullModesAck => "PULL_MODES_ACK",
            Verb::PushModes => "PUSH_MODES",
            Verb::PushModesAck => "PUSH_MODES_ACK",
            Verb::DemoMode => "DEMO_MODE",
            Verb::DemoModeAck => "DEMO_MODE_ACK",
            Verb::ClearDemo => "CLEAR_DEMO",
            Verb::ClearDemoAck => "CLEAR_DEMO_ACK",
            Verb::Goodbye => "GOODBYE",
            Verb::TransmitVl => "TRANSMIT_VL",
            Verb::TransmitVlAck => "TRANSMIT_VL_ACK",
            Verb::ListenVl => "LISTEN_VL",
            Verb::ListenVlAck => "LISTEN_VL_ACK",
            Verb::PullChromaHdr => "PULL_CHROMA_HDR",
            Verb::PullChromaHdrAck => "PULL_CHROMA_HDR_ACK",
            Verb::PushChromaHdr => "PUSH_CHROMA_HDR",
            Verb::PushChromaHdrAck => "PUSH_CHROMA_HDR_ACK",
            Verb::PullChromaMode => "PULL_CHROMA_MODE",
            Verb::PullChromaModeAck => "PULL_CHROMA_MODE_ACK",
            Verb::PushChromaMode => "PUSH_CHROMA_MODE",
            Verb::PushChromaModeAck => "PUSH_CHROMA_MODE_ACK",
            Verb::PullSingleMode => "PULL_SINGLE_MODE",
            Verb::PullSingleModeAck => "PULL_SINGLE_MODE_ACK",
            Verb::PushSingleMode => "PUSH_SINGLE_MODE",
            Verb::PushSingleModeAck => "PUSH_SINGLE_MODE_ACK",
            Verb::PullEachMode => "PULL_EACH_MODE",
            Verb::PullEachModeAck => "PULL_EACH_MODE_ACK",
            Verb::PullEachModeDone => "PULL_EACH_MODE_DONE",
            Verb::PushEachMode => "PUSH_EACH_MODE",
            Verb::PushEachModeAck => "PUSH_EACH_MODE_ACK",
            Verb::PushEachModeDone => "PUSH_EACH_MODE_DONE",
            Verb::FlashFirmware => "FLASH_FIRMWARE",
            Verb::FlashFirmwareAck => "FLASH_FIRMWARE_ACK",
            Verb::FlashFirmwareDone => "FLASH_FIRMWARE_DONE",
            Verb::SetGlobalBrightness => "SET_GLOBAL_BRIGHTNESS",
            Verb::SetGlobalBrightnessAck => "SET_GLOBAL_BRIGHTNESS_ACK",
            Verb::GetGlobalBrightness => "GET_GLOBAL_BRIGHTNESS",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
