use btleplug::api::BDAddr;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::{HYENA_MANUFACTURER, HYENA_MODEL, HYENA_NAME_PREFIX};

/// Battery state of charge reported by the motor controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct BatteryReading {
    percent: u8,
}

impl BatteryReading {
    /// Highest valid state of charge
    pub const MAX_PERCENT: u8 = 100;

    /// Build a reading from the raw SOC byte, clamping anything above 100%
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        let percent = if raw > Self::MAX_PERCENT {
            Self::MAX_PERCENT
        } else {
            raw
        };
        Self { percent }
    }

    /// State of charge in percent, always within `0..=100`
    #[must_use]
    pub const fn percent(self) -> u8 {
        self.percent
    }
}

impl From<u8> for BatteryReading {
    fn from(raw: u8) -> Self {
        Self::from_raw(raw)
    }
}

impl From<BatteryReading> for u8 {
    fn from(reading: BatteryReading) -> Self {
        reading.percent
    }
}

impl fmt::Display for BatteryReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent)
    }
}

/// Battery temperature in tenths of a degree Celsius
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemperatureReading {
    tenths: i16,
}

impl TemperatureReading {
    /// Build a reading from the raw 16-bit field (tenths of a degree)
    #[must_use]
    pub const fn from_tenths(tenths: i16) -> Self {
        Self { tenths }
    }

    /// Raw value in tenths of a degree Celsius
    #[must_use]
    pub const fn tenths(self) -> i16 {
        self.tenths
    }

    /// Temperature in degrees Celsius
    #[must_use]
    pub fn celsius(self) -> f32 {
        f32::from(self.tenths) / 10.0
    }
}

impl fmt::Display for TemperatureReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°C", self.celsius())
    }
}

/// A single decoded telemetry value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reading {
    /// Battery state of charge
    Battery(BatteryReading),
    /// Battery temperature
    Temperature(TemperatureReading),
}

impl Reading {
    /// The sensor this reading belongs to
    #[must_use]
    pub const fn kind(&self) -> SensorKind {
        match self {
            Self::Battery(_) => SensorKind::Battery,
            Self::Temperature(_) => SensorKind::Temperature,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Battery(battery) => write!(f, "{}: {battery}", SensorKind::Battery),
            Self::Temperature(temp) => write!(f, "{}: {temp}", SensorKind::Temperature),
        }
    }
}

/// Sensors exposed for each e-bike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    /// Battery state of charge sensor
    Battery,
    /// Battery temperature sensor (diagnostic)
    Temperature,
}

impl SensorKind {
    /// All sensors, in display order
    pub const ALL: [Self; 2] = [Self::Battery, Self::Temperature];

    /// Short machine-readable key
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::Temperature => "temperature",
        }
    }

    /// Unit of measurement
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Battery => "%",
            Self::Temperature => "°C",
        }
    }

    /// Stable identifier for this sensor on the given device
    #[must_use]
    pub fn unique_id(self, address: BDAddr) -> String {
        format!("{address}_{}", self.key())
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Battery => write!(f, "Battery"),
            Self::Temperature => write!(f, "Battery Temperature"),
        }
    }
}

/// Device information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Advertised local name
    pub name: String,
    /// Bluetooth address, used as the stable device identifier
    pub address: BDAddr,
    /// Signal strength (RSSI) at discovery time
    pub rssi: i16,
    /// Manufacturer
    pub manufacturer: String,
    /// Model
    pub model: String,
}

impl DeviceInfo {
    /// Create new device info with the Hyena manufacturer and model
    #[must_use]
    pub fn new(name: String, address: BDAddr, rssi: i16) -> Self {
        Self {
            name,
            address,
            rssi,
            manufacturer: HYENA_MANUFACTURER.to_string(),
            model: HYENA_MODEL.to_string(),
        }
    }
}

/// Latest telemetry for one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Last battery reading
    pub battery: Option<BatteryReading>,
    /// Last temperature reading
    pub temperature: Option<TemperatureReading>,
    /// When the battery reading arrived
    pub battery_updated: Option<Instant>,
    /// When the temperature reading arrived
    pub temperature_updated: Option<Instant>,
}

impl TelemetrySnapshot {
    /// Record a reading received at `at`
    pub fn apply(&mut self, reading: Reading, at: Instant) {
        match reading {
            Reading::Battery(battery) => {
                self.battery = Some(battery);
                self.battery_updated = Some(at);
            }
            Reading::Temperature(temp) => {
                self.temperature = Some(temp);
                self.temperature_updated = Some(at);
            }
        }
    }

    /// When the given sensor was last updated
    #[must_use]
    pub const fn last_updated(&self, kind: SensorKind) -> Option<Instant> {
        match kind {
            SensorKind::Battery => self.battery_updated,
            SensorKind::Temperature => self.temperature_updated,
        }
    }

    /// Whether the sensor has a value no older than `stale_after` at `now`
    #[must_use]
    pub fn is_available_at(&self, kind: SensorKind, stale_after: Duration, now: Instant) -> bool {
        self.last_updated(kind)
            .is_some_and(|at| now.saturating_duration_since(at) <= stale_after)
    }
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Scan duration in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Disconnect after this long without notifications
    pub idle_disconnect_ms: u64,
    /// Sensors are reported unavailable after this long without an update
    pub stale_after_ms: u64,
    /// Capacity of the raw notification channel
    pub channel_capacity: usize,
    /// Advertised name prefix identifying the bike
    pub name_prefix: String,
}

impl MonitorConfig {
    /// Scan duration
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Connection timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Idle disconnect delay
    #[must_use]
    pub const fn idle_disconnect(&self) -> Duration {
        Duration::from_millis(self.idle_disconnect_ms)
    }

    /// Staleness threshold for sensor availability
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 30_000,
            idle_disconnect_ms: 120_000,
            stale_after_ms: 300_000,
            channel_capacity: 64,
            name_prefix: HYENA_NAME_PREFIX.to_string(),
        }
    }
}
