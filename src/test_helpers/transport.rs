use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::bootloader::FakeEspBootloader;
use super::device::FakeVortexDevice;
use crate::transport::{
    BacklogFeed, ByteBacklog, ControlLines, Transport, TransportError, TransportKind,
};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

struct Shared {
    feed: Mutex<Option<BacklogFeed>>,
    active: AtomicBool,
    writes: Mutex<Vec<Vec<u8>>>,
    responder: Mutex<Responder>,
    reply_delay: Duration,
    signals: Mutex<Vec<(&'static str, bool)>>,
    signal_calls: AtomicUsize,
    signal_budget: Mutex<Option<usize>>,
    baud_rates: Mutex<Vec<u32>>,
}

impl Shared {
    fn deliver(&self, bytes: Vec<u8>) {
        if let Some(feed) = self.feed.lock().unwrap().as_ref() {
            let _ = feed.send(bytes);
        }
    }
}

/// In-memory transport whose replies come from a responder closure.
///
/// Every write is recorded and handed to the responder; whatever it returns
/// is queued as inbound bytes. Clones share the same connection.
#[derive(Clone)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
    backlog: Arc<ByteBacklog>,
}

impl ScriptedTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        Self::build(Box::new(responder), Duration::ZERO)
    }

    /// A transport that never answers.
    pub fn silent() -> Self {
        Self::new(|_: &[u8]| Vec::new())
    }

    /// A transport wired to a fake lightshow device.
    pub fn with_device(mut device: FakeVortexDevice) -> Self {
        let delay = device.reply_delay();
        Self::build(Box::new(move |data: &[u8]| device.receive(data)), delay)
    }

    /// A transport wired to a fake ESP32 ROM loader.
    pub fn with_bootloader(bootloader: FakeEspBootloader) -> Self {
        Self::new(move |data: &[u8]| bootloader.receive(data))
    }

    fn build(responder: Responder, reply_delay: Duration) -> Self {
        let (feed, backlog) = ByteBacklog::channel();
        Self {
            shared: Arc::new(Shared {
                feed: Mutex::new(Some(feed)),
                active: AtomicBool::new(true),
                writes: Mutex::new(Vec::new()),
                responder: Mutex::new(responder),
                reply_delay,
                signals: Mutex::new(Vec::new()),
                signal_calls: AtomicUsize::new(0),
                signal_budget: Mutex::new(None),
                baud_rates: Mutex::new(Vec::new()),
            }),
            backlog: Arc::new(backlog),
        }
    }

    /// Queue inbound bytes as if the device had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.shared.deliver(bytes.to_vec());
    }

    /// Simulate the device going away (cable pulled).
    pub fn disconnect(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.feed.lock().unwrap().take();
    }

    /// Every write so far, one entry per call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.shared.writes.lock().unwrap().clear();
    }

    /// DTR/RTS changes in order, e.g. `("DTR", true)`.
    pub fn control_signals(&self) -> Vec<(&'static str, bool)> {
        self.shared.signals.lock().unwrap().clone()
    }

    pub fn clear_control_signals(&self) {
        self.shared.signals.lock().unwrap().clear();
    }

    /// Let `count` line changes succeed, then fail every one after.
    pub fn fail_control_lines_after(&self, count: usize) {
        *self.shared.signal_budget.lock().unwrap() = Some(count);
    }

    pub fn baud_rates(&self) -> Vec<u32> {
        self.shared.baud_rates.lock().unwrap().clone()
    }

    fn record_signal(&self, line: &'static str, level: bool) -> Result<(), TransportError> {
        let call = self.shared.signal_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(budget) = *self.shared.signal_budget.lock().unwrap() {
            if call >= budget {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    format!("{} line stuck", line),
                )));
            }
        }
        self.shared.signals.lock().unwrap().push((line, level));
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::Closed);
        }
        self.shared.writes.lock().unwrap().push(data.to_vec());

        let reply = {
            let mut responder = self.shared.responder.lock().unwrap();
            (&mut **responder)(data)
        };
        if reply.is_empty() {
            return Ok(());
        }

        if self.shared.reply_delay.is_zero() {
            self.shared.deliver(reply);
        } else {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                tokio::time::sleep(shared.reply_delay).await;
                shared.deliver(reply);
            });
        }
        Ok(())
    }

    async fn read_byte(&self) -> Result<u8, TransportError> {
        self.backlog.read_byte().await
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.backlog.cancel();
    }

    async fn clear_input(&self) {
        self.backlog.clear().await;
    }

    async fn close(&self) {
        self.disconnect();
        self.backlog.cancel();
    }
}

#[async_trait]
impl ControlLines for ScriptedTransport {
    async fn set_dtr(&self, level: bool) -> Result<(), TransportError> {
        self.record_signal("DTR", level)
    }

    async fn set_rts(&self, level: bool) -> Result<(), TransportError> {
        self.record_signal("RTS", level)
    }

    async fn set_baud_rate(&self, baud_rate: u32) -> Result<(), TransportError> {
        self.shared.baud_rates.lock().unwrap().push(baud_rate);
        Ok(())
    }
}
