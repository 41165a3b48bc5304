//! Connection owner: session state, single-flight marker and background
//! listener.

use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::command::{CommandChannel, OperationKind, OperationState};
use super::session::{perform_handshake, Capability, DeviceIdentity, DeviceSession, SessionState};
use super::verb::Verb;
use crate::engine::ModeEngine;
use crate::error::{LinkError, LinkResult};
use crate::settings::LinkSettings;
use crate::transport::{Transport, TransportError, TransportKind};

pub(crate) struct LinkInner {
    pub(crate) settings: LinkSettings,
    pub(crate) engine: Arc<dyn ModeEngine>,
    session: Mutex<DeviceSession>,
    operation: Mutex<OperationState>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a device connection. Cheap to clone.
#[derive(Clone)]
pub struct DeviceLink {
    pub(crate) inner: Arc<LinkInner>,
}

/// Marks the link busy until dropped.
///
/// Dropping clears the marker and restarts background listening when the
/// session is still active, whatever way the operation ended.
pub(crate) struct OperationGuard {
    inner: Arc<LinkInner>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Ok(mut operation) = self.inner.operation.lock() {
            operation.finish();
        }
        start_listener(&self.inner);
    }
}

impl DeviceLink {
    pub fn new(settings: LinkSettings, engine: Arc<dyn ModeEngine>) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                settings,
                engine,
                session: Mutex::new(DeviceSession::default()),
                operation: Mutex::new(OperationState::Idle),
                transport: Mutex::new(None),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.inner.settings
    }

    /// Handshake with a device on a freshly opened transport.
    ///
    /// Any previous session is torn down first. On failure the transport is
    /// closed and the session left `Disconnected`.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> LinkResult<DeviceIdentity> {
        let _guard = self.claim(OperationKind::Connect)?;
        self.disconnect().await;

        if let Ok(mut session) = self.inner.session.lock() {
            session.begin_connect(transport.kind());
        }
        if let Ok(mut slot) = self.inner.transport.lock() {
            *slot = Some(transport.clone());
        }

        info!(transport = %transport.kind(), "connecting");
        transport.clear_input().await;

        let result = perform_handshake(
            transport.as_ref(),
            &self.inner.session,
            self.inner.settings.handshake_attempts,
            self.inner.settings.handshake_interval(),
        )
        .await;

        match result {
            Ok(identity) => {
                if let Ok(mut session) = self.inner.session.lock() {
                    session.activate(identity.clone());
                }
                Ok(identity)
            }
            Err(e) => {
                warn!("handshake failed: {}", e);
                self.drop_transport().await;
                Err(e)
            }
        }
    }

    /// Say goodbye (best effort) and release the transport.
    pub async fn disconnect(&self) {
        let transport = self.current_transport();
        stop_listener(&self.inner, transport.as_deref()).await;

        if let Some(transport) = transport {
            transport.cancel();
            if self.is_connected() && transport.is_active() {
                if let Err(e) = transport.write(&[Verb::Goodbye.code()]).await {
                    debug!("goodbye not delivered: {}", e);
                }
            }
            info!("disconnecting");
        }
        self.drop_transport().await;
    }

    /// Abort the read the current operation is waiting on.
    ///
    /// The operation fails with [`LinkError::Cancelled`]. Does nothing when
    /// idle and never interrupts a write.
    pub fn cancel(&self) {
        if let Some(transport) = self.current_transport() {
            debug!("cancelling pending read");
            transport.cancel();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session_state() == SessionState::Active
    }

    pub fn session_state(&self) -> SessionState {
        self.inner
            .session
            .lock()
            .map(|s| s.state())
            .unwrap_or(SessionState::Disconnected)
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.inner
            .session
            .lock()
            .ok()
            .and_then(|s| s.identity().cloned())
    }

    pub fn capability(&self) -> Option<Capability> {
        self.inner.session.lock().ok().and_then(|s| s.capability())
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.inner
            .session
            .lock()
            .ok()
            .and_then(|s| s.transport_kind())
    }

    /// Operation currently holding the link.
    pub fn current_operation(&self) -> Option<OperationKind> {
        self.inner.operation.lock().ok().and_then(|op| op.current())
    }

    /// Claim the link for `kind` on an active session.
    ///
    /// Stops background listening and drops stale input before returning.
    pub(crate) async fn begin_operation(
        &self,
        kind: OperationKind,
    ) -> LinkResult<(OperationGuard, Arc<dyn Transport>)> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let guard = self.claim(kind)?;
        let transport = self.current_transport().ok_or(LinkError::NotConnected)?;

        stop_listener(&self.inner, Some(transport.as_ref())).await;
        transport.clear_input().await;

        debug!(operation = ?kind, "operation started");
        Ok((guard, transport))
    }

    /// Command channel with the configured timeout and ack policy.
    pub(crate) fn channel<'a>(&self, transport: &'a dyn Transport) -> CommandChannel<'a> {
        CommandChannel::new(
            transport,
            self.inner.settings.command_timeout(),
            self.inner.settings.ack_mismatch_policy,
        )
    }

    /// Post-process an operation result before the guard is released.
    pub(crate) async fn finish<T>(&self, result: LinkResult<T>) -> LinkResult<T> {
        match result {
            Err(LinkError::Transport(TransportError::Cancelled)) => {
                info!("operation cancelled");
                Err(LinkError::Cancelled)
            }
            Err(e) if e.is_disconnect() => {
                warn!("connection lost: {}", e);
                self.drop_transport().await;
                Err(e)
            }
            other => other,
        }
    }

    fn claim(&self, kind: OperationKind) -> LinkResult<OperationGuard> {
        let mut operation = self
            .inner
            .operation
            .lock()
            .map_err(|_| LinkError::NotConnected)?;
        operation
            .try_begin(kind)
            .map_err(|current| LinkError::Busy { current })?;
        Ok(OperationGuard {
            inner: self.inner.clone(),
        })
    }

    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport.lock().ok().and_then(|t| t.clone())
    }

    async fn drop_transport(&self) {
        mark_disconnected(&self.inner);
        let transport = self.inner.transport.lock().ok().and_then(|mut t| t.take());
        if let Some(transport) = transport {
            transport.close().await;
        }
    }
}

fn mark_disconnected(inner: &LinkInner) {
    if let Ok(mut session) = inner.session.lock() {
        if session.state() != SessionState::Disconnected {
            session.disconnect();
        }
    }
}

/// Drain unsolicited bytes while idle and notice the transport closing.
fn start_listener(inner: &Arc<LinkInner>) {
    let active = inner.session.lock().map(|s| s.is_active()).unwrap_or(false);
    if !active {
        return;
    }
    let transport = match inner.transport.lock().ok().and_then(|t| t.clone()) {
        Some(transport) => transport,
        None => return,
    };
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => return,
    };

    let weak: Weak<LinkInner> = Arc::downgrade(inner);
    let task = handle.spawn(async move {
        loop {
            match transport.read_byte().await {
                Ok(byte) => trace!(byte, "unsolicited byte"),
                Err(TransportError::Cancelled) => continue,
                Err(e) => {
                    info!("device went away: {}", e);
                    if let Some(inner) = weak.upgrade() {
                        mark_disconnected(&inner);
                        let closed = inner.transport.lock().ok().and_then(|mut t| t.take());
                        if let Some(transport) = closed {
                            transport.close().await;
                        }
                    }
                    break;
                }
            }
        }
    });

    if let Ok(mut listener) = inner.listener.lock() {
        if let Some(previous) = listener.replace(task) {
            previous.abort();
        }
    }
}

async fn stop_listener(inner: &LinkInner, transport: Option<&dyn Transport>) {
    let task = inner.listener.lock().ok().and_then(|mut l| l.take());
    if let Some(task) = task {
        if let Some(transport) = transport {
            transport.cancel();
        }
        task.abort();
        // JoinError here only reports the abort
        let _ = task.await;
    }
}
