//! Inbound byte backlog fed by a transport's reader.
//!
//! Readers push whole chunks (a serial read, a BLE notification) into an
//! unbounded channel. `read_byte` drains the pending chunk one byte at a time
//! and only awaits the channel when the backlog is empty, so waiting costs
//! nothing and cancellation is a notification rather than a polled flag.

use std::collections::VecDeque;

use tokio::sync::{mpsc, Mutex, Notify};

use super::TransportError;

/// Producer side of a backlog.
pub type BacklogFeed = mpsc::UnboundedSender<Vec<u8>>;

struct BacklogInner {
    pending: VecDeque<u8>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

/// Consumer side of a backlog.
pub struct ByteBacklog {
    inner: Mutex<BacklogInner>,
    cancel: Notify,
}

impl ByteBacklog {
    /// Create a backlog and the feed that fills it.
    ///
    /// Dropping every feed marks the connection as closed once the remaining
    /// bytes are consumed.
    pub fn channel() -> (BacklogFeed, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Self {
            inner: Mutex::new(BacklogInner {
                pending: VecDeque::new(),
                rx,
                closed: false,
            }),
            cancel: Notify::new(),
        };
        (tx, backlog)
    }

    /// Wait for the next byte.
    pub async fn read_byte(&self) -> Result<u8, TransportError> {
        let mut inner = self.inner.lock().await;

        loop {
            if let Some(byte) = inner.pending.pop_front() {
                return Ok(byte);
            }
            if inner.closed {
                return Err(TransportError::Closed);
            }

            let received = {
                let rx = &mut inner.rx;
                tokio::select! {
                    biased;
                    _ = self.cancel.notified() => None,
                    chunk = rx.recv() => Some(chunk),
                }
            };

            match received {
                None => return Err(TransportError::Cancelled),
                Some(Some(chunk)) => inner.pending.extend(chunk),
                Some(None) => inner.closed = true,
            }
        }
    }

    /// Wake a pending `read_byte` with [`TransportError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }

    /// Discard buffered and queued bytes.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.pending.clear();
        loop {
            match inner.rx.try_recv() {
                Ok(_) => continue,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    inner.closed = true;
                    break;
                }
            }
        }
    }

    /// Number of bytes already pulled off the channel but not yet read.
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}
