use async_trait::async_trait;
use btleplug::api::BDAddr;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::{
    error::{HyenaError, Result},
    types::{DeviceInfo, Reading, SensorKind, TelemetrySnapshot},
};

/// A decoded reading tagged with the device it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryUpdate {
    /// Bluetooth address of the e-bike
    pub address: BDAddr,
    /// Decoded value
    pub reading: Reading,
    /// When the notification was decoded
    pub received_at: Instant,
}

impl TelemetryUpdate {
    /// Create an update stamped with the current time
    #[must_use]
    pub fn now(address: BDAddr, reading: Reading) -> Self {
        Self {
            address,
            reading,
            received_at: Instant::now(),
        }
    }
}

/// Consumer of decoded telemetry
///
/// Implementations own whatever happens to a reading after decoding:
/// entity state, metrics, forwarding. The decoder never retains readings.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Accept one update
    ///
    /// # Errors
    ///
    /// Returns an error if the sink can no longer accept updates. The
    /// pipeline logs the failure and keeps going.
    async fn publish(&self, update: TelemetryUpdate) -> Result<()>;
}

#[async_trait]
impl<S: TelemetrySink + ?Sized> TelemetrySink for Arc<S> {
    async fn publish(&self, update: TelemetryUpdate) -> Result<()> {
        (**self).publish(update).await
    }
}

/// Sink forwarding every update into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<TelemetryUpdate>,
}

impl ChannelSink {
    /// Create a sink and the receiving half of its channel
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TelemetryUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TelemetrySink for ChannelSink {
    async fn publish(&self, update: TelemetryUpdate) -> Result<()> {
        self.sender
            .send(update)
            .map_err(|_| HyenaError::Disconnected)
    }
}

/// Sink keeping the latest reading of every sensor per device
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    snapshots: Arc<RwLock<HashMap<BDAddr, TelemetrySnapshot>>>,
}

impl SnapshotStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest telemetry for a device, if it ever reported any
    pub async fn snapshot(&self, address: BDAddr) -> Option<TelemetrySnapshot> {
        self.snapshots.read().await.get(&address).copied()
    }

    /// Addresses of every device that has reported
    pub async fn devices(&self) -> Vec<BDAddr> {
        self.snapshots.read().await.keys().copied().collect()
    }

    /// Whether a sensor has a value no older than `stale_after`
    pub async fn is_available(
        &self,
        address: BDAddr,
        kind: SensorKind,
        stale_after: Duration,
    ) -> bool {
        self.snapshot(address)
            .await
            .is_some_and(|s| s.is_available_at(kind, stale_after, Instant::now()))
    }
}

#[async_trait]
impl TelemetrySink for SnapshotStore {
    async fn publish(&self, update: TelemetryUpdate) -> Result<()> {
        self.snapshots
            .write()
            .await
            .entry(update.address)
            .or_default()
            .apply(update.reading, update.received_at);
        Ok(())
    }
}

/// Lookup of device metadata by Bluetooth address
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Add or refresh a device
    async fn register(&self, info: DeviceInfo);

    /// Metadata for a device, if known
    async fn lookup(&self, address: BDAddr) -> Option<DeviceInfo>;
}

/// Registry held in memory for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    devices: RwLock<HashMap<BDAddr, DeviceInfo>>,
}

impl InMemoryRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered devices
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Whether no device has been registered
    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryRegistry {
    async fn register(&self, info: DeviceInfo) {
        let address = info.address;
        let previous = self.devices.write().await.insert(address, info);
        if previous.is_none() {
            info!("Registered e-bike {address}");
        } else {
            debug!("Refreshed e-bike {address}");
        }
    }

    async fn lookup(&self, address: BDAddr) -> Option<DeviceInfo> {
        self.devices.read().await.get(&address).cloned()
    }
}
