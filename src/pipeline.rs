use btleplug::api::BDAddr;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    protocol::{log_rejected, parse_packet, DecodeError},
    sink::{TelemetrySink, TelemetryUpdate},
};

/// Raw payload of one BLE notification on the telemetry characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Bluetooth address of the sending e-bike
    pub address: BDAddr,
    /// Notification payload
    pub value: Bytes,
}

impl RawNotification {
    /// Create a notification from any byte container
    pub fn new(address: BDAddr, value: impl Into<Bytes>) -> Self {
        Self {
            address,
            value: value.into(),
        }
    }
}

/// Create the single-consumer channel between transport and decoder
///
/// A capacity of zero is bumped to one.
#[must_use]
pub fn notification_channel(
    capacity: usize,
) -> (mpsc::Sender<RawNotification>, mpsc::Receiver<RawNotification>) {
    mpsc::channel(capacity.max(1))
}

/// Counters describing what the pipeline saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Notifications received
    pub notifications: u64,
    /// Readings handed to the sink
    pub readings: u64,
    /// Packets of a kind that is not decoded
    pub unrecognized: u64,
    /// Known packets with a wrong length, plus empty notifications
    pub malformed: u64,
    /// Frame delimiters
    pub delimiters: u64,
    /// Updates the sink refused
    pub sink_failures: u64,
}

impl PipelineStats {
    fn record_rejected(&mut self, err: &DecodeError) {
        match err {
            DecodeError::FrameDelimiter => self.delimiters += 1,
            DecodeError::Unrecognized { .. } => self.unrecognized += 1,
            DecodeError::Empty | DecodeError::Malformed { .. } => self.malformed += 1,
        }
    }
}

/// Decode notifications in arrival order and publish readings to `sink`
///
/// Runs until every sender of `receiver` has been dropped. Neither a bad
/// packet nor a failing sink stops the loop.
pub async fn forward_readings<S: TelemetrySink + ?Sized>(
    mut receiver: mpsc::Receiver<RawNotification>,
    sink: &S,
) -> PipelineStats {
    let mut stats = PipelineStats::default();

    while let Some(notification) = receiver.recv().await {
        stats.notifications += 1;

        let reading = match parse_packet(&notification.value) {
            Ok(reading) => reading,
            Err(e) => {
                log_rejected(&notification.value, &e);
                stats.record_rejected(&e);
                continue;
            }
        };

        debug!("{} {reading}", notification.address);
        stats.readings += 1;

        let update = TelemetryUpdate::now(notification.address, reading);
        if let Err(e) = sink.publish(update).await {
            stats.sink_failures += 1;
            warn!("Failed to publish {reading} from {}: {e}", notification.address);
        }
    }

    debug!("Notification channel closed: {stats:?}");
    stats
}
