use btleplug::{
    api::{
        BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        ValueNotification,
    },
    platform::{Manager, Peripheral},
};
use futures::stream::{Stream, StreamExt};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{timeout, timeout_at, Instant},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{HyenaError, Result},
    pipeline::RawNotification,
    protocol::parse_packet,
    types::{DeviceInfo, MonitorConfig},
    HYENA_SERVICE_UUID, HYENA_TELEMETRY_CHAR_UUID,
};

/// BLE manager for Hyena e-bike discovery
pub struct BleManager {
    manager: Manager,
    peripherals: Arc<Mutex<HashMap<BDAddr, Peripheral>>>,
}

impl BleManager {
    /// Create a new BLE manager
    ///
    /// # Errors
    ///
    /// Returns [`HyenaError::Ble`] if the Bluetooth adapter cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Scan for e-bikes advertising a name with the configured prefix
    ///
    /// # Errors
    ///
    /// Returns [`HyenaError::DeviceNotFound`] if no Bluetooth adapters are available,
    /// or [`HyenaError::Ble`] for other Bluetooth-related errors.
    pub async fn scan_for_devices(&self, config: &MonitorConfig) -> Result<Vec<DeviceInfo>> {
        info!("Starting scan for Hyena e-bikes...");

        let adapters = self.manager.adapters().await?;
        let central = adapters.first().ok_or(HyenaError::DeviceNotFound)?;

        // Not every firmware advertises the service UUID, so match on name instead.
        central.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(config.scan_timeout()).await;
        central.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in central.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            if !matches_name_prefix(properties.local_name.as_deref(), &config.name_prefix) {
                continue;
            }

            let device_info = DeviceInfo::new(
                properties.local_name.unwrap_or_default(),
                peripheral.address(),
                properties.rssi.unwrap_or(i16::MIN),
            );
            info!(
                "Found Hyena e-bike: {} ({}, RSSI {})",
                device_info.name, device_info.address, device_info.rssi
            );

            self.peripherals
                .lock()
                .await
                .insert(peripheral.address(), peripheral);
            devices.push(device_info);
        }

        info!("Scan completed. Found {} e-bike(s)", devices.len());
        Ok(devices)
    }

    /// Connect to a previously scanned device and subscribe to telemetry
    ///
    /// # Errors
    ///
    /// Returns [`HyenaError::DeviceNotFound`] if the device was not seen by a scan,
    /// [`HyenaError::Timeout`] if connection times out,
    /// [`HyenaError::ConnectionFailed`] if connection fails,
    /// or [`HyenaError::Protocol`] if the telemetry characteristic is missing.
    /// Any failure after the link is up disconnects again before returning.
    pub async fn connect_to_device(
        &self,
        device_info: &DeviceInfo,
        config: &MonitorConfig,
    ) -> Result<EBikeConnection> {
        info!("Connecting to e-bike: {}", device_info.address);

        let peripheral = self
            .peripherals
            .lock()
            .await
            .get(&device_info.address)
            .cloned()
            .ok_or(HyenaError::DeviceNotFound)?;

        timeout(config.connect_timeout(), peripheral.connect())
            .await
            .map_err(|_| HyenaError::Timeout {
                timeout_ms: config.connect_timeout_ms,
            })?
            .map_err(|e| HyenaError::ConnectionFailed(e.to_string()))?;

        let telemetry_char = match subscribe_telemetry(&peripheral).await {
            Ok(characteristic) => characteristic,
            Err(e) => {
                if let Err(disconnect_error) = peripheral.disconnect().await {
                    debug!("Error during disconnect: {disconnect_error}");
                }
                return Err(e);
            }
        };

        info!("Subscribed to telemetry notifications from {}", device_info.address);

        Ok(EBikeConnection {
            address: device_info.address,
            peripheral,
            telemetry_char,
        })
    }
}

/// Active, subscribed connection to an e-bike
pub struct EBikeConnection {
    address: BDAddr,
    peripheral: Peripheral,
    telemetry_char: Characteristic,
}

impl EBikeConnection {
    /// Forward telemetry notifications into `sender` from a background task
    ///
    /// See [`pump_notifications`] for when the task ends.
    #[must_use]
    pub fn spawn_pump(
        &self,
        sender: mpsc::Sender<RawNotification>,
        idle_timeout: Duration,
    ) -> JoinHandle<Result<PumpExit>> {
        tokio::spawn(pump_notifications(
            self.peripheral.clone(),
            self.telemetry_char.uuid,
            sender,
            idle_timeout,
        ))
    }

    /// Check if the device is still connected
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Unsubscribe and disconnect
    ///
    /// # Errors
    ///
    /// Returns [`HyenaError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.peripheral.unsubscribe(&self.telemetry_char).await {
            debug!("Error during unsubscribe: {e}");
        }
        self.peripheral.disconnect().await?;
        info!("Disconnected from {}", self.address);
        Ok(())
    }

    /// Get device address
    #[must_use]
    pub const fn address(&self) -> BDAddr {
        self.address
    }
}

/// Why a notification pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The BLE stack closed the notification stream, usually a disconnect
    StreamEnded,
    /// The decoder side of the channel went away
    ReceiverDropped,
    /// No notification arrived within the idle timeout
    Idle,
}

/// Forward notifications of one characteristic as [`RawNotification`]s
///
/// See [`forward_notifications`] for when this returns.
///
/// # Errors
///
/// Returns [`HyenaError::Ble`] if the notification stream cannot be opened.
pub async fn pump_notifications(
    peripheral: Peripheral,
    characteristic: Uuid,
    sender: mpsc::Sender<RawNotification>,
    idle_timeout: Duration,
) -> Result<PumpExit> {
    let address = peripheral.address();
    let notification_stream = peripheral.notifications().await?;

    Ok(forward_notifications(
        notification_stream,
        address,
        characteristic,
        sender,
        idle_timeout,
    )
    .await)
}

/// Forward notifications from any notification stream
///
/// Returns when the stream ends, the receiver is dropped, or no battery or
/// temperature packet arrived for `idle_timeout`. Delimiters and packet kinds
/// that are not decoded are still forwarded but do not keep the connection
/// alive.
pub async fn forward_notifications<S>(
    mut notification_stream: S,
    address: BDAddr,
    characteristic: Uuid,
    sender: mpsc::Sender<RawNotification>,
    idle_timeout: Duration,
) -> PumpExit
where
    S: Stream<Item = ValueNotification> + Unpin,
{
    let mut deadline = Instant::now() + idle_timeout;

    loop {
        let Ok(next) = timeout_at(deadline, notification_stream.next()).await else {
            warn!(
                "No telemetry from {address} for {}s, releasing connection",
                idle_timeout.as_secs()
            );
            return PumpExit::Idle;
        };
        let Some(data) = next else {
            debug!("Notification stream from {address} ended");
            return PumpExit::StreamEnded;
        };
        if data.uuid != characteristic {
            continue;
        }
        if parse_packet(&data.value).is_ok() {
            deadline = Instant::now() + idle_timeout;
        }
        if sender
            .send(RawNotification::new(address, data.value))
            .await
            .is_err()
        {
            return PumpExit::ReceiverDropped;
        }
    }
}

async fn subscribe_telemetry(peripheral: &Peripheral) -> Result<Characteristic> {
    peripheral.discover_services().await?;
    let telemetry_char = find_telemetry_characteristic(peripheral)?;
    peripheral.subscribe(&telemetry_char).await?;
    Ok(telemetry_char)
}

fn find_telemetry_characteristic(peripheral: &Peripheral) -> Result<Characteristic> {
    let service_uuid = parse_uuid(HYENA_SERVICE_UUID)?;
    let char_uuid = parse_uuid(HYENA_TELEMETRY_CHAR_UUID)?;

    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == char_uuid && c.service_uuid == service_uuid)
        .ok_or_else(|| HyenaError::Protocol("Telemetry characteristic not found".to_string()))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| HyenaError::Protocol(format!("Invalid UUID {value}: {e}")))
}

fn matches_name_prefix(local_name: Option<&str>, prefix: &str) -> bool {
    local_name.is_some_and(|name| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HYENA_NAME_PREFIX;

    #[test]
    fn test_uuid_parsing() {
        let service_uuid = parse_uuid(HYENA_SERVICE_UUID).unwrap();
        assert_eq!(
            service_uuid.to_string(),
            "48592800-6879-656e-6174-656b2e485550"
        );

        let char_uuid = parse_uuid(HYENA_TELEMETRY_CHAR_UUID).unwrap();
        assert_eq!(
            char_uuid.to_string(),
            "48590001-6879-656e-6174-656b2e485550"
        );

        assert!(matches!(
            parse_uuid("not-a-uuid"),
            Err(HyenaError::Protocol(_))
        ));
    }

    fn notification(uuid: Uuid, value: &[u8]) -> ValueNotification {
        ValueNotification {
            uuid,
            value: value.to_vec(),
        }
    }

    fn telemetry_uuid() -> Uuid {
        parse_uuid(HYENA_TELEMETRY_CHAR_UUID).unwrap()
    }

    fn address() -> BDAddr {
        BDAddr::from([0xAA, 0, 0, 0, 0, 0x01])
    }

    #[tokio::test]
    async fn test_forward_until_stream_ends() {
        let (tx, mut rx) = mpsc::channel(8);
        let stream = futures::stream::iter(vec![
            notification(telemetry_uuid(), &[0x0A, 0x57]),
            notification(telemetry_uuid(), &[0x07, 0x00, 0xC8]),
        ]);

        let exit =
            forward_notifications(stream, address(), telemetry_uuid(), tx, Duration::from_secs(120))
                .await;

        assert_eq!(exit, PumpExit::StreamEnded);
        assert_eq!(
            rx.recv().await,
            Some(RawNotification::new(address(), vec![0x0A, 0x57]))
        );
        assert_eq!(
            rx.recv().await,
            Some(RawNotification::new(address(), vec![0x07, 0x00, 0xC8]))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_forward_filters_other_characteristics() {
        let (tx, mut rx) = mpsc::channel(8);
        let other = parse_uuid(HYENA_SERVICE_UUID).unwrap();
        let stream = futures::stream::iter(vec![
            notification(other, &[0x0A, 0x10]),
            notification(telemetry_uuid(), &[0x0A, 0x20]),
            notification(other, &[0x07, 0x00, 0x01]),
        ]);

        let exit =
            forward_notifications(stream, address(), telemetry_uuid(), tx, Duration::from_secs(120))
                .await;

        assert_eq!(exit, PumpExit::StreamEnded);
        assert_eq!(
            rx.recv().await,
            Some(RawNotification::new(address(), vec![0x0A, 0x20]))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_forward_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let stream = futures::stream::iter(vec![
            notification(telemetry_uuid(), &[0x0A, 0x57]),
            notification(telemetry_uuid(), &[0x0A, 0x56]),
        ]);

        let exit =
            forward_notifications(stream, address(), telemetry_uuid(), tx, Duration::from_secs(120))
                .await;

        assert_eq!(exit, PumpExit::ReceiverDropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_idle_timeout() {
        let (tx, _rx) = mpsc::channel(8);
        let stream = futures::stream::pending::<ValueNotification>();
        let started = Instant::now();

        let exit =
            forward_notifications(stream, address(), telemetry_uuid(), tx, Duration::from_secs(120))
                .await;

        assert_eq!(exit, PumpExit::Idle);
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_packets_do_not_keep_connection() {
        let (tx, mut rx) = mpsc::channel(64);
        let uuid = telemetry_uuid();
        let stream = futures::stream::unfold((), move |()| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Some((notification(uuid, &[0x05, 0x01, 0x02]), ()))
        });

        let exit = forward_notifications(
            Box::pin(stream),
            address(),
            telemetry_uuid(),
            tx,
            Duration::from_secs(60),
        )
        .await;

        assert_eq!(exit, PumpExit::Idle);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readings_keep_connection_alive() {
        let (tx, mut rx) = mpsc::channel(64);
        let uuid = telemetry_uuid();
        let stream = futures::stream::unfold(0u8, move |sent| async move {
            if sent == 4 {
                return None;
            }
            tokio::time::sleep(Duration::from_secs(45)).await;
            Some((notification(uuid, &[0x0A, 90 - sent]), sent + 1))
        });

        let exit = forward_notifications(
            Box::pin(stream),
            address(),
            telemetry_uuid(),
            tx,
            Duration::from_secs(60),
        )
        .await;

        assert_eq!(exit, PumpExit::StreamEnded);
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[test]
    fn test_name_prefix_matching() {
        assert!(matches_name_prefix(Some("XWTK00008OXW"), HYENA_NAME_PREFIX));
        assert!(matches_name_prefix(Some("XWTK"), HYENA_NAME_PREFIX));
        assert!(!matches_name_prefix(Some("xwtk00008oxw"), HYENA_NAME_PREFIX));
        assert!(!matches_name_prefix(Some("Garmin Edge"), HYENA_NAME_PREFIX));
        assert!(!matches_name_prefix(None, HYENA_NAME_PREFIX));
    }
}
