use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::engine::TestEngine;
use crate::engine::{Mode, ModeEngine, ModeStore};
use crate::protocol::chromalink::DuoHeader;
use crate::protocol::frame::{encode_framed, FrameDecoder};
use crate::protocol::verb::Verb;

/// What the fake device remembers; shared with the test through `state()`.
#[derive(Debug, Default)]
pub struct FakeDeviceState {
    pub modes: Vec<Mode>,
    pub demo: Option<Vec<u8>>,
    pub brightness: u8,
    pub transmitted: Vec<Vec<u8>>,
    pub duo_header: Option<DuoHeader>,
    pub duo_modes: Vec<Mode>,
    pub duo_firmware: Vec<u8>,
    pub received: Vec<Verb>,
    pub sent: Vec<Verb>,
}

impl FakeDeviceState {
    pub fn acks_sent(&self, verb: Verb) -> usize {
        self.sent.iter().filter(|&&v| v == verb).count()
    }
}

/// What the next inbound frame is for.
#[derive(Debug, Clone, Copy)]
enum Pending {
    Demo,
    PushSave,
    PushEachCount,
    PushEachMode { remaining: usize },
    Brightness,
    TransmitVl,
    PullSingleIndex,
    PushSingleIndex,
    PushSingleMode { index: usize },
    ChromaHeader,
    ChromaPullIndex,
    ChromaPushIndex,
    ChromaPushMode { index: usize },
    FirmwareSize,
    FirmwareBlock { remaining: usize },
}

/// Scripted lightshow controller speaking the verb protocol.
///
/// Built like a fixture:
///
/// ```ignore
/// let device = FakeVortexDevice::new("Spark", "1.4.0").with_modes(modes).silent_after(2);
/// ```
pub struct FakeVortexDevice {
    name: String,
    version: String,
    state: Arc<Mutex<FakeDeviceState>>,
    pending: Option<Pending>,
    decoder: FrameDecoder,
    pull_cursor: usize,
    incoming_modes: Vec<Mode>,
    modes_sent: usize,
    silent_after: Option<usize>,
    reply_delay: Duration,
    wrong_ack: Option<Verb>,
    corrupt_duo: bool,
}

impl FakeVortexDevice {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            state: Arc::new(Mutex::new(FakeDeviceState::default())),
            pending: None,
            decoder: FrameDecoder::new(),
            pull_cursor: 0,
            incoming_modes: Vec::new(),
            modes_sent: 0,
            silent_after: None,
            reply_delay: Duration::ZERO,
            wrong_ack: None,
            corrupt_duo: false,
        }
    }

    pub fn with_modes(self, modes: Vec<Mode>) -> Self {
        self.state.lock().unwrap().modes = modes;
        self
    }

    pub fn with_duo(self, header: DuoHeader, modes: Vec<Mode>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.duo_header = Some(header);
            state.duo_modes = modes;
        }
        self
    }

    /// Stop answering anything once `count` modes have been sent.
    pub fn silent_after(mut self, count: usize) -> Self {
        self.silent_after = Some(count);
        self
    }

    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Answer with a stray byte wherever `verb` would be sent.
    pub fn wrong_ack_for(mut self, verb: Verb) -> Self {
        self.wrong_ack = Some(verb);
        self
    }

    /// Flip a byte in every header and mode relayed from the Duo.
    pub fn corrupt_duo_payloads(mut self) -> Self {
        self.corrupt_duo = true;
        self
    }

    pub fn state(&self) -> Arc<Mutex<FakeDeviceState>> {
        self.state.clone()
    }

    pub fn reply_delay(&self) -> Duration {
        self.reply_delay
    }

    fn greeting(&self) -> Vec<u8> {
        format!("== {} v{} (built Jan 1 2024) ==\r\n", self.name, self.version).into_bytes()
    }

    fn silenced(&self) -> bool {
        matches!(self.silent_after, Some(limit) if self.modes_sent >= limit)
    }

    fn send_verb(&self, out: &mut Vec<u8>, verb: Verb) {
        if self.silenced() {
            return;
        }
        self.state.lock().unwrap().sent.push(verb);
        if self.wrong_ack == Some(verb) {
            out.push(b'!');
        } else {
            out.push(verb.code());
        }
    }

    fn send_frame(&self, out: &mut Vec<u8>, payload: &[u8]) {
        if !self.silenced() {
            out.extend(encode_framed(payload));
        }
    }

    fn send_mode(&mut self, out: &mut Vec<u8>, stream: &[u8]) {
        if !self.silenced() {
            out.extend(encode_framed(stream));
            self.modes_sent += 1;
        }
    }

    fn send_duo_stream(&self, out: &mut Vec<u8>, mut stream: Vec<u8>) {
        if self.corrupt_duo {
            if let Some(last) = stream.last_mut() {
                *last ^= 0xFF;
            }
        }
        self.send_frame(out, &stream);
    }

    fn expect_frame(&mut self, out: &mut Vec<u8>, pending: Pending) {
        self.pending = Some(pending);
        self.send_verb(out, Verb::Ready);
    }

    fn index(payload: &[u8]) -> usize {
        TestEngine
            .unwrap(payload)
            .ok()
            .and_then(|raw| raw.get(..4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .unwrap_or(u32::MAX) as usize
    }

    /// Feed bytes written by the host; returns the device's reply.
    pub fn receive(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for &byte in data {
            match self.pending {
                Some(pending) => {
                    if let Ok(Some(payload)) = self.decoder.push(byte) {
                        self.pending = None;
                        self.on_frame(pending, payload, &mut out);
                    }
                }
                None => {
                    if let Some(verb) = Verb::from_byte(byte) {
                        self.on_verb(verb, &mut out);
                    }
                }
            }
        }
        out
    }

    fn on_verb(&mut self, verb: Verb, out: &mut Vec<u8>) {
        self.state.lock().unwrap().received.push(verb);

        match verb {
            Verb::Hello => out.extend(self.greeting()),
            Verb::DemoMode => self.expect_frame(out, Pending::Demo),
            Verb::ClearDemo => {
                self.state.lock().unwrap().demo = None;
                self.send_verb(out, Verb::ClearDemoAck);
            }
            Verb::PushModes => self.expect_frame(out, Pending::PushSave),
            Verb::PullModes => {
                let store = ModeStore::new(self.state.lock().unwrap().modes.clone());
                if let Ok(save) = TestEngine.pack_save(&store) {
                    self.send_frame(out, &save);
                }
            }
            Verb::PullModesDone => self.send_verb(out, Verb::PullModesAck),
            Verb::PushEachMode => self.expect_frame(out, Pending::PushEachCount),
            Verb::PushEachModeDone => {
                let modes = std::mem::take(&mut self.incoming_modes);
                self.state.lock().unwrap().modes = modes;
            }
            Verb::PullEachMode => {
                self.pull_cursor = 0;
                let count = self.state.lock().unwrap().modes.len() as u32;
                self.send_frame(out, &TestEngine.wrap(&count.to_le_bytes()));
            }
            Verb::PullEachModeAck => {
                let next = self
                    .state
                    .lock()
                    .unwrap()
                    .modes
                    .get(self.pull_cursor)
                    .cloned();
                match next {
                    Some(mode) => {
                        self.pull_cursor += 1;
                        self.send_mode(out, &mode.stream);
                    }
                    None => self.send_verb(out, Verb::PullEachModeDone),
                }
            }
            Verb::SetGlobalBrightness => self.expect_frame(out, Pending::Brightness),
            Verb::GetGlobalBrightness => {
                let brightness = self.state.lock().unwrap().brightness;
                self.send_frame(out, &TestEngine.wrap(&[brightness]));
            }
            Verb::TransmitVl => self.expect_frame(out, Pending::TransmitVl),
            Verb::ListenVl => self.send_mode(out, &TestEngine.wrap(b"received over vl")),
            Verb::PullSingleMode => self.expect_frame(out, Pending::PullSingleIndex),
            Verb::PushSingleMode => self.expect_frame(out, Pending::PushSingleIndex),
            Verb::PullChromaHdr => {
                let header = self.state.lock().unwrap().duo_header;
                if let Some(header) = header {
                    self.send_duo_stream(out, TestEngine.wrap(&header.to_bytes()));
                }
            }
            Verb::PushChromaHdr => self.expect_frame(out, Pending::ChromaHeader),
            Verb::PullChromaMode => self.expect_frame(out, Pending::ChromaPullIndex),
            Verb::PushChromaMode => self.expect_frame(out, Pending::ChromaPushIndex),
            Verb::FlashFirmware => self.expect_frame(out, Pending::FirmwareSize),
            // acknowledgements from the host and Goodbye need no answer
            _ => {}
        }
    }

    fn on_frame(&mut self, pending: Pending, payload: Vec<u8>, out: &mut Vec<u8>) {
        match pending {
            Pending::Demo => {
                self.state.lock().unwrap().demo = Some(payload);
                self.send_verb(out, Verb::DemoModeAck);
            }
            Pending::PushSave => {
                if let Ok(store) = TestEngine.unpack_save(&payload) {
                    self.state.lock().unwrap().modes = store.modes;
                    self.send_verb(out, Verb::PushModesAck);
                }
            }
            Pending::PushEachCount => {
                let count = Self::index(&payload);
                self.incoming_modes.clear();
                self.send_verb(out, Verb::PushEachModeAck);
                if count > 0 && count != u32::MAX as usize {
                    self.pending = Some(Pending::PushEachMode { remaining: count });
                }
            }
            Pending::PushEachMode { remaining } => {
                self.incoming_modes.push(Mode::new(payload));
                self.send_verb(out, Verb::PushEachModeAck);
                if remaining > 1 {
                    self.pending = Some(Pending::PushEachMode {
                        remaining: remaining - 1,
                    });
                }
            }
            Pending::Brightness => {
                let value = TestEngine
                    .unwrap(&payload)
                    .ok()
                    .and_then(|raw| raw.first().copied());
                if let Some(value) = value {
                    self.state.lock().unwrap().brightness = value;
                    self.send_verb(out, Verb::SetGlobalBrightnessAck);
                }
            }
            Pending::TransmitVl => {
                self.state.lock().unwrap().transmitted.push(payload);
                self.send_verb(out, Verb::TransmitVlAck);
            }
            Pending::PullSingleIndex => {
                let mode = self
                    .state
                    .lock()
                    .unwrap()
                    .modes
                    .get(Self::index(&payload))
                    .cloned();
                if let Some(mode) = mode {
                    self.send_mode(out, &mode.stream);
                }
            }
            Pending::PushSingleIndex => {
                let index = Self::index(&payload);
                self.expect_frame(out, Pending::PushSingleMode { index });
            }
            Pending::PushSingleMode { index } => {
                let mut state = self.state.lock().unwrap();
                if index < state.modes.len() {
                    state.modes[index] = Mode::new(payload);
                } else {
                    state.modes.push(Mode::new(payload));
                }
                drop(state);
                self.send_verb(out, Verb::PushSingleModeAck);
            }
            Pending::ChromaHeader => {
                let header = TestEngine
                    .unwrap(&payload)
                    .ok()
                    .and_then(|raw| DuoHeader::from_bytes(&raw).ok());
                if let Some(header) = header {
                    self.state.lock().unwrap().duo_header = Some(header);
                    self.send_verb(out, Verb::PushChromaHdrAck);
                }
            }
            Pending::ChromaPullIndex => {
                let mode = self
                    .state
                    .lock()
                    .unwrap()
                    .duo_modes
                    .get(Self::index(&payload))
                    .cloned();
                if let Some(mode) = mode {
                    self.send_duo_stream(out, mode.stream);
                }
            }
            Pending::ChromaPushIndex => {
                let index = Self::index(&payload);
                self.expect_frame(out, Pending::ChromaPushMode { index });
            }
            Pending::ChromaPushMode { index } => {
                let mut state = self.state.lock().unwrap();
                if index < state.duo_modes.len() {
                    state.duo_modes[index] = Mode::new(payload);
                } else {
                    state.duo_modes.push(Mode::new(payload));
                }
                drop(state);
                self.send_verb(out, Verb::PushChromaModeAck);
            }
            Pending::FirmwareSize => {
                let size = Self::index(&payload);
                self.state.lock().unwrap().duo_firmware.clear();
                self.send_verb(out, Verb::FlashFirmwareAck);
                if size > 0 && size != u32::MAX as usize {
                    self.pending = Some(Pending::FirmwareBlock { remaining: size });
                }
            }
            Pending::FirmwareBlock { remaining } => {
                let remaining = remaining.saturating_sub(payload.len());
                self.state
                    .lock()
                    .unwrap()
                    .duo_firmware
                    .extend_from_slice(&payload);
                self.send_verb(out, Verb::FlashFirmwareAck);
                if remaining > 0 {
                    self.pending = Some(Pending::FirmwareBlock { remaining });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_gets_greeting() {
        let mut device = FakeVortexDevice::new("Spark", "1.4.0");
        let reply = device.receive(&[Verb::Hello.code()]);
        assert_eq!(reply, b"== Spark v1.4.0 (built Jan 1 2024) ==\r\n".to_vec());
    }

    #[test]
    fn test_demo_exchange() {
        let mut device = FakeVortexDevice::new("Spark", "1.4.0");
        assert_eq!(device.receive(&[Verb::DemoMode.code()]), vec![Verb::Ready.code()]);
        assert_eq!(
            device.receive(&encode_framed(b"mode")),
            vec![Verb::DemoModeAck.code()]
        );
        assert_eq!(device.state().lock().unwrap().demo, Some(b"mode".to_vec()));
    }
}
