//! Bluetooth LE transport.
//!
//! The device exposes one GATT service with a write characteristic and a
//! notify characteristic. Writes go out unmodified; each notification value is
//! appended to the backlog by a forwarding task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ByteBacklog, Transport, TransportError, TransportKind};

/// GATT UUIDs used by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleServiceIds {
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
}

impl Default for BleServiceIds {
    /// Nordic UART Service layout.
    fn default() -> Self {
        Self {
            service: Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e),
            write: Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e),
            notify: Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e),
        }
    }
}

/// A peripheral found while scanning.
#[derive(Debug, Clone)]
pub struct BleDevice {
    pub name: String,
    pub peripheral: Peripheral,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

async fn first_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(TransportError::NoDeviceFound)
}

/// Scan for peripherals whose advertised name starts with `name_prefix`.
pub async fn scan_devices(
    name_prefix: &str,
    scan_time: Duration,
) -> Result<Vec<BleDevice>, TransportError> {
    let adapter = first_adapter().await?;
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(scan_time).await;
    adapter.stop_scan().await.ok();

    let mut found = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let name = match peripheral.properties().await.ok().flatten() {
            Some(props) => props.local_name,
            None => continue,
        };
        if let Some(name) = name.filter(|n| n.starts_with(name_prefix)) {
            found.push(BleDevice { name, peripheral });
        }
    }

    debug!(prefix = name_prefix, count = found.len(), "BLE scan finished");
    Ok(found)
}

/// BLE transport over a connected peripheral.
pub struct BleTransport {
    peripheral: Peripheral,
    write_char: Characteristic,
    backlog: ByteBacklog,
    active: Arc<AtomicBool>,
    forwarder: JoinHandle<()>,
}

impl BleTransport {
    /// Connect, discover services and subscribe to notifications.
    pub async fn connect(device: &BleDevice, ids: BleServiceIds) -> Result<Self, TransportError> {
        let peripheral = device.peripheral.clone();

        match tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect()).await {
            Ok(result) => result?,
            Err(_) => {
                peripheral.disconnect().await.ok();
                return Err(TransportError::NoDeviceFound);
            }
        }
        match tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services()).await {
            Ok(result) => result?,
            Err(_) => {
                peripheral.disconnect().await.ok();
                return Err(TransportError::MissingCharacteristic {
                    uuid: ids.service.to_string(),
                });
            }
        }

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid && c.service_uuid == ids.service)
                .cloned()
                .ok_or(TransportError::MissingCharacteristic {
                    uuid: uuid.to_string(),
                })
        };
        let write_char = find(ids.write)?;
        let notify_char = find(ids.notify)?;

        peripheral.subscribe(&notify_char).await?;
        let mut notifications = peripheral.notifications().await?;

        let (feed, backlog) = ByteBacklog::channel();
        let active = Arc::new(AtomicBool::new(true));
        let forwarder = {
            let active = active.clone();
            let notify_uuid = notify_char.uuid;
            let name = device.name.clone();
            tokio::spawn(async move {
                while let Some(notification) = notifications.next().await {
                    if notification.uuid != notify_uuid {
                        continue;
                    }
                    if feed.send(notification.value).is_err() {
                        break;
                    }
                }
                active.store(false, Ordering::SeqCst);
                debug!(device = %name, "BLE notification stream ended");
            })
        };

        info!(device = %device.name, "BLE connected");

        Ok(Self {
            peripheral,
            write_char,
            backlog,
            active,
            forwarder,
        })
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::Closed);
        }
        self.peripheral
            .write(&self.write_char, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
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
        self.backlog.clear().await;
    }

    async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.forwarder.abort();
        self.backlog.cancel();
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("BLE disconnect failed: {}", e);
        }
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
