#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # hyena-ebike
//!
//! Battery telemetry from Trek e-bikes with a Hyena motor system, read over
//! Bluetooth Low Energy.
//!
//! The motor controller streams small notifications on a vendor
//! characteristic. Each notification starts with a packet id; this crate
//! decodes two of them:
//!
//! | Packet id | Payload | Meaning |
//! |-----------|---------|---------|
//! | `0x0A` | 1 byte | Battery state of charge, percent |
//! | `0x07` | 2 bytes, big-endian `i16` | Battery temperature, tenths of a degree Celsius |
//!
//! Every other packet (speed, cadence, voltage, ...) and every packet with an
//! unexpected length is skipped without interrupting the stream.
//!
//! ## Layout
//!
//! - [`protocol`]: the stateless decoder, usable without any BLE stack
//! - [`pipeline`]: single-consumer channel from transport to sink
//! - [`sink`]: where decoded readings go, and device metadata
//! - [`ble`]: discovery and notification transport over `btleplug`
//! - [`monitor`]: everything wired together
//!
//! ## Decoding only
//!
//! ```
//! use hyena_ebike::{decode, Reading};
//!
//! match decode(&[0x0A, 0x57]) {
//!     Some(Reading::Battery(battery)) => assert_eq!(battery.percent(), 87),
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert_eq!(decode(&[0x05, 0x01, 0x02, 0x03]), None);
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use hyena_ebike::{EBikeMonitor, SnapshotStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let monitor = EBikeMonitor::connect_first().await?;
//!     let store = SnapshotStore::new();
//!     monitor.run(&store).await?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy discovery and notification transport
pub mod ble;
/// Error types and handling
pub mod error;
/// High-level monitor combining transport, decoder and sink
pub mod monitor;
/// Notification pipeline from transport to sink
pub mod pipeline;
/// Telemetry packet decoding
pub mod protocol;
/// Telemetry sinks and device registry
pub mod sink;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use error::{HyenaError, Result};
pub use monitor::EBikeMonitor;
pub use pipeline::{forward_readings, notification_channel, PipelineStats, RawNotification};
pub use protocol::{decode, parse_packet, DecodeError, PacketId};
pub use sink::{
    ChannelSink, DeviceRegistry, InMemoryRegistry, SnapshotStore, TelemetrySink, TelemetryUpdate,
};
pub use types::{
    BatteryReading, DeviceInfo, MonitorConfig, Reading, SensorKind, TelemetrySnapshot,
    TemperatureReading,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Primary GATT service of the Hyena motor controller
pub const HYENA_SERVICE_UUID: &str = "48592800-6879-656E-6174-656B2E485550";

/// Characteristic carrying telemetry notifications
pub const HYENA_TELEMETRY_CHAR_UUID: &str = "48590001-6879-656E-6174-656B2E485550";

/// Advertised local name prefix of Hyena motor controllers
pub const HYENA_NAME_PREFIX: &str = "XWTK";

/// Manufacturer reported for discovered bikes
pub const HYENA_MANUFACTURER: &str = "Hyena";

/// Model reported for discovered bikes
pub const HYENA_MODEL: &str = "Trek FX+2";
