use crate::{
    ble::{BleManager, EBikeConnection},
    error::{HyenaError, Result},
    pipeline::{forward_readings, notification_channel, PipelineStats},
    sink::{DeviceRegistry, InMemoryRegistry, TelemetrySink},
    types::{DeviceInfo, MonitorConfig},
};
use std::sync::Arc;
use tracing::{debug, info};

/// Main interface for reading telemetry from a Hyena e-bike
///
/// `EBikeMonitor` discovers a bike, connects to it, subscribes to the
/// telemetry characteristic and feeds every notification through the
/// decoder into a [`TelemetrySink`].
///
/// The monitor makes exactly one connection attempt. Reconnecting after the
/// bike goes out of range or after an idle disconnect is up to the caller.
///
/// # Examples
///
/// ## Keep the latest values in memory
///
/// ```no_run
/// use hyena_ebike::{EBikeMonitor, SensorKind, SnapshotStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let monitor = EBikeMonitor::connect_first().await?;
///     let store = SnapshotStore::new();
///
///     let stats = monitor.run(&store).await?;
///     println!("Decoded {} readings", stats.readings);
///
///     let address = monitor.device_info().address;
///     if let Some(snapshot) = store.snapshot(address).await {
///         println!("Battery: {:?}", snapshot.battery);
///     }
///     Ok(())
/// }
/// ```
///
/// ## Custom configuration
///
/// ```no_run
/// use hyena_ebike::{ChannelSink, EBikeMonitor, MonitorConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = MonitorConfig {
///         scan_timeout_ms: 20_000,
///         idle_disconnect_ms: 60_000,
///         ..Default::default()
///     };
///
///     let monitor = EBikeMonitor::connect_first_with_config(config).await?;
///     let (sink, mut updates) = ChannelSink::new();
///
///     tokio::spawn(async move {
///         while let Some(update) = updates.recv().await {
///             println!("{}: {}", update.address, update.reading);
///         }
///     });
///
///     monitor.run(&sink).await?;
///     Ok(())
/// }
/// ```
pub struct EBikeMonitor {
    connection: EBikeConnection,
    device_info: DeviceInfo,
    config: MonitorConfig,
    registry: Arc<InMemoryRegistry>,
    #[allow(dead_code)]
    ble_manager: BleManager,
}

impl EBikeMonitor {
    /// Connect to the nearest e-bike with default settings
    ///
    /// # Errors
    ///
    /// Returns [`HyenaError::DeviceNotFound`] if no e-bike is found during the
    /// scan, or any connection error from the underlying BLE stack.
    pub async fn connect_first() -> Result<Self> {
        Self::connect_first_with_config(MonitorConfig::default()).await
    }

    /// Connect to the nearest e-bike with a custom configuration
    ///
    /// When several bikes answer the scan, the one with the strongest signal
    /// wins.
    ///
    /// # Errors
    ///
    /// Returns [`HyenaError::DeviceNotFound`] if no e-bike is found during the
    /// scan, or any connection error from the underlying BLE stack.
    pub async fn connect_first_with_config(config: MonitorConfig) -> Result<Self> {
        let ble_manager = BleManager::new().await?;
        let devices = ble_manager.scan_for_devices(&config).await?;
        let device_info = select_strongest(devices).ok_or(HyenaError::DeviceNotFound)?;

        Self::connect_to_device(ble_manager, device_info, config).await
    }

    /// Connect to a device found by a scan on `ble_manager`
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device was not part of a previous scan
    /// - Connection times out or fails
    /// - The telemetry characteristic is missing
    pub async fn connect_to_device(
        ble_manager: BleManager,
        device_info: DeviceInfo,
        config: MonitorConfig,
    ) -> Result<Self> {
        let connection = ble_manager.connect_to_device(&device_info, &config).await?;

        let registry = Arc::new(InMemoryRegistry::new());
        registry.register(device_info.clone()).await;

        Ok(Self {
            connection,
            device_info,
            config,
            registry,
            ble_manager,
        })
    }

    /// Get device information
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Get the monitor configuration
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Registry holding metadata of the connected bike
    #[must_use]
    pub fn registry(&self) -> Arc<InMemoryRegistry> {
        Arc::clone(&self.registry)
    }

    /// Check if the device is connected
    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Stream telemetry into `sink` until the connection goes quiet
    ///
    /// Notifications are decoded in arrival order. The run ends when the BLE
    /// stack closes the notification stream or when no battery or temperature
    /// packet arrived for [`MonitorConfig::idle_disconnect_ms`]; packets that
    /// are skipped do not count as activity. The bike is then disconnected to
    /// free the connection slot, also when the notification task failed.
    ///
    /// # Errors
    ///
    /// Returns [`HyenaError::Ble`] if the notification stream cannot be
    /// opened, or [`HyenaError::Task`] if the notification task panicked.
    /// Bad packets and sink failures never end the run.
    pub async fn run<S: TelemetrySink + ?Sized>(&self, sink: &S) -> Result<PipelineStats> {
        let (sender, receiver) = notification_channel(self.config.channel_capacity);
        let pump = self
            .connection
            .spawn_pump(sender, self.config.idle_disconnect());

        info!("Monitoring telemetry from {}", self.device_info.address);
        let stats = forward_readings(receiver, sink).await;
        let exit = pump.await;

        if self.is_connected().await {
            if let Err(e) = self.connection.disconnect().await {
                debug!("Error during disconnect: {e}");
            }
        }

        let exit = exit??;
        info!(
            "Telemetry from {} stopped ({exit:?}): {} notifications, {} readings, {} malformed",
            self.device_info.address, stats.notifications, stats.readings, stats.malformed
        );

        Ok(stats)
    }

    /// Disconnect from the device
    ///
    /// # Errors
    ///
    /// Returns [`HyenaError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }
}

/// Pick the device with the strongest signal
fn select_strongest(devices: Vec<DeviceInfo>) -> Option<DeviceInfo> {
    devices.into_iter().max_by_key(|device| device.rssi)
}
