//! USB-serial transport.
//!
//! A reader thread pulls whatever the driver has buffered and forwards it to
//! the backlog; writes and control-line changes go through a cloned handle.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPort;
use tracing::{debug, warn};

use super::{BacklogFeed, ByteBacklog, ControlLines, Transport, TransportError, TransportKind};

/// Read timeout of the reader thread. Bounds how long `close` waits for it.
const READER_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Size of one driver read.
const READ_CHUNK_SIZE: usize = 1024;

/// Serial port transport implementation.
pub struct SerialTransport {
    port_name: String,
    writer: Arc<Mutex<Box<dyn SerialPort>>>,
    backlog: ByteBacklog,
    active: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Open a serial port with a specific baud rate.
    ///
    /// Retries transient failures seen while a device re-enumerates, which
    /// happens right after a reset into or out of the bootloader.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let normalized_name = normalize_port_name(port_name);

        const MAX_OPEN_RETRIES: u32 = 10;
        const RETRY_DELAY_MS: u64 = 200;

        let mut attempt = 0;
        let port = loop {
            attempt += 1;
            match serialport::new(&normalized_name, baud_rate)
                .timeout(READER_POLL_TIMEOUT)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .open()
            {
                Ok(port) => break port,
                Err(e) => {
                    let err_str = e.to_string().to_lowercase();

                    // "not functioning": Windows driver not ready after USB re-enumeration
                    let is_transient = err_str.contains("not functioning")
                        || err_str.contains("temporarily unavailable")
                        || err_str.contains("interrupted");

                    if is_transient && attempt < MAX_OPEN_RETRIES {
                        debug!(port = port_name, attempt, "transient open failure: {}", e);
                        std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                        continue;
                    }

                    return Err(match e.kind() {
                        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                            TransportError::PortPermissionDenied {
                                port: port_name.to_string(),
                            }
                        }
                        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound)
                        | serialport::ErrorKind::NoDevice => TransportError::NoDeviceFound,
                        _ if err_str.contains("busy") || err_str.contains("in use") => {
                            TransportError::PortBusy {
                                port: port_name.to_string(),
                            }
                        }
                        _ => TransportError::Serial(e),
                    });
                }
            }
        };

        port.clear(serialport::ClearBuffer::Input).ok();
        let reader = port.try_clone()?;

        let (feed, backlog) = ByteBacklog::channel();
        let active = Arc::new(AtomicBool::new(true));
        spawn_reader(port_name.to_string(), reader, feed, active.clone());

        debug!(port = port_name, baud_rate, "serial port open");

        Ok(Self {
            port_name: port_name.to_string(),
            writer: Arc::new(Mutex::new(port)),
            backlog,
            active,
        })
    }

    /// The port name this transport was opened with.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn with_port<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn SerialPort>) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut port = self
            .writer
            .lock()
            .map_err(|_| TransportError::Closed)?;
        f(&mut port)
    }
}

/// Forward driver reads into the backlog until the port fails or closes.
fn spawn_reader(
    port_name: String,
    mut reader: Box<dyn SerialPort>,
    feed: BacklogFeed,
    active: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut buffer = [0u8; READ_CHUNK_SIZE];

        while active.load(Ordering::SeqCst) {
            match reader.read(&mut buffer) {
                Ok(0) => continue,
                Ok(n) => {
                    if feed.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(port = %port_name, "serial read failed: {}", e);
                    break;
                }
            }
        }

        // Dropping the feed closes the backlog.
        active.store(false, Ordering::SeqCst);
        debug!(port = %port_name, "serial reader stopped");
    });
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::Closed);
        }

        let writer = self.writer.clone();
        let data = data.to_vec();

        // The OS handles USB packetization; write_all covers partial writes.
        tokio::task::spawn_blocking(move || {
            let mut port = writer.lock().map_err(|_| TransportError::Closed)?;
            port.write_all(&data)?;
            port.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    async fn read_byte(&self) -> Result<u8, TransportError> {
        self.backlog.read_byte().await
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.backlog.cancel();
    }

    async fn clear_input(&self) {
        self.with_port(|port| Ok(port.clear(serialport::ClearBuffer::Input)?))
            .ok();
        self.backlog.clear().await;
    }

    async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.backlog.cancel();
    }
}

#[async_trait]
impl ControlLines for SerialTransport {
    async fn set_dtr(&self, level: bool) -> Result<(), TransportError> {
        self.with_port(|port| Ok(port.write_data_terminal_ready(level)?))
    }

    async fn set_rts(&self, level: bool) -> Result<(), TransportError> {
        self.with_port(|port| Ok(port.write_request_to_send(level)?))
    }

    async fn set_baud_rate(&self, baud_rate: u32) -> Result<(), TransportError> {
        self.with_port(|port| Ok(port.set_baud_rate(baud_rate)?))
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Normalize a port name for cross-platform compatibility.
pub(crate) fn normalize_port_name(name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        // Prefer cu. over tty. so opening does not block waiting for DCD
        if name.starts_with("/dev/tty.") {
            return name.replace("/dev/tty.", "/dev/cu.");
        }
    }

    #[cfg(target_os = "windows")]
    {
        // COM ports > 9 need \\.\\ prefix
        if name.starts_with("COM") {
            if let Ok(n) = name[3..].parse::<u32>() {
                if n > 9 {
                    return format!("\\\\.\\{}", name);
                }
            }
        }
    }

    name.to_string()
}
