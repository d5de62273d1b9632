use crate::types::{BatteryReading, Reading, TemperatureReading};
use bytes::Buf;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Delimiter the motor controller sends between bursts of telemetry packets
pub const FRAME_DELIMITER: [u8; 8] = [0xEE, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Packet identifiers documented for the Hyena telemetry characteristic
///
/// Only [`PacketId::BatterySoc`] and [`PacketId::Temperature`] are decoded.
/// The rest are known to appear on the wire and are skipped like any other
/// unrecognized packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketId {
    /// Battery voltage
    Voltage = 0x01,
    /// Wheel speed in RPM
    SpeedRpm = 0x05,
    /// Motor current and power
    CurrentPower = 0x06,
    /// Battery temperature, big-endian i16 in tenths of a degree
    Temperature = 0x07,
    /// Pedal cadence
    PedalCadence = 0x08,
    /// Motor status flags
    MotorStatus = 0x09,
    /// Battery state of charge, one byte percentage
    BatterySoc = 0x0A,
}

impl PacketId {
    /// Convert from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Voltage),
            0x05 => Some(Self::SpeedRpm),
            0x06 => Some(Self::CurrentPower),
            0x07 => Some(Self::Temperature),
            0x08 => Some(Self::PedalCadence),
            0x09 => Some(Self::MotorStatus),
            0x0A => Some(Self::BatterySoc),
            _ => None,
        }
    }

    /// Payload length of the packet kinds this crate decodes
    #[must_use]
    pub const fn payload_len(self) -> Option<usize> {
        match self {
            Self::BatterySoc => Some(1),
            Self::Temperature => Some(2),
            _ => None,
        }
    }
}

/// Why a notification produced no reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Notification carried no bytes at all
    #[error("empty notification")]
    Empty,

    /// Burst delimiter, carries no data
    #[error("frame delimiter")]
    FrameDelimiter,

    /// Packet kind this crate does not decode
    #[error("unrecognized packet id {packet_id:#04X}")]
    Unrecognized {
        /// First byte of the notification
        packet_id: u8,
    },

    /// Known packet kind with the wrong payload length
    #[error("malformed packet {packet_id:#04X}: expected {expected} payload byte(s), got {actual}")]
    Malformed {
        /// First byte of the notification
        packet_id: u8,
        /// Payload length the packet kind requires
        expected: usize,
        /// Payload length received
        actual: usize,
    },
}

impl DecodeError {
    /// Routine outcomes happen on every ride and are not worth reporting
    #[must_use]
    pub const fn is_routine(&self) -> bool {
        matches!(self, Self::FrameDelimiter | Self::Unrecognized { .. })
    }
}

/// Parse one telemetry notification
///
/// Packet layout:
/// - Byte 0: packet id
/// - `0x0A`: one byte state of charge (percent)
/// - `0x07`: two byte big-endian signed temperature in tenths of a degree Celsius
///
/// Battery values above 100 are clamped.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing why the notification carries no reading.
pub fn parse_packet(data: &[u8]) -> std::result::Result<Reading, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    if data == FRAME_DELIMITER.as_slice() {
        return Err(DecodeError::FrameDelimiter);
    }

    let mut buf = data;
    let packet_id = buf.get_u8();

    let Some(kind) = PacketId::from_u8(packet_id) else {
        return Err(DecodeError::Unrecognized { packet_id });
    };
    let Some(expected) = kind.payload_len() else {
        return Err(DecodeError::Unrecognized { packet_id });
    };
    if buf.remaining() != expected {
        return Err(DecodeError::Malformed {
            packet_id,
            expected,
            actual: buf.remaining(),
        });
    }

    let reading = match kind {
        PacketId::BatterySoc => {
            let raw = buf.get_u8();
            if raw > BatteryReading::MAX_PERCENT {
                warn!(raw, "Battery SOC out of range, clamping to 100%");
            }
            Reading::Battery(BatteryReading::from_raw(raw))
        }
        PacketId::Temperature => Reading::Temperature(TemperatureReading::from_tenths(buf.get_i16())),
        _ => return Err(DecodeError::Unrecognized { packet_id }),
    };

    Ok(reading)
}

/// Decode one notification, absorbing every failure
///
/// This is the entry point for the notification path: it never fails and
/// never panics. Malformed packets are logged at debug level, routine skips
/// at trace level.
#[must_use]
pub fn decode(data: &[u8]) -> Option<Reading> {
    match parse_packet(data) {
        Ok(reading) => {
            debug!("Decoded {reading}");
            Some(reading)
        }
        Err(e) => {
            log_rejected(data, &e);
            None
        }
    }
}

pub(crate) fn log_rejected(data: &[u8], err: &DecodeError) {
    if err.is_routine() {
        trace!("Skipping notification: {err}");
    } else {
        debug!("Dropping notification {:02X?}: {err}", data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_packet() {
        assert_eq!(
            decode(&[0x0A, 0x57]),
            Some(Reading::Battery(BatteryReading::from_raw(87)))
        );
    }

    #[test]
    fn test_battery_full_range() {
        for value in 0..=100u8 {
            let reading = decode(&[0x0A, value]);
            assert_eq!(reading, Some(Reading::Battery(BatteryReading::from_raw(value))));
            if let Some(Reading::Battery(battery)) = reading {
                assert_eq!(battery.percent(), value);
            }
        }
    }

    #[test]
    fn test_battery_out_of_range_clamped() {
        let reading = decode(&[0x0A, 0xC8]);
        assert_eq!(
            reading,
            Some(Reading::Battery(BatteryReading::from_raw(100)))
        );
    }

    #[test]
    fn test_temperature_packet() {
        let reading = decode(&[0x07, 0x00, 0xC8]);
        assert_eq!(
            reading,
            Some(Reading::Temperature(TemperatureReading::from_tenths(200)))
        );
        if let Some(Reading::Temperature(temp)) = reading {
            assert!((temp.celsius() - 20.0).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_negative_temperature() {
        let reading = decode(&[0x07, 0xFF, 0x38]);
        assert_eq!(
            reading,
            Some(Reading::Temperature(TemperatureReading::from_tenths(-200)))
        );
        if let Some(Reading::Temperature(temp)) = reading {
            assert!((temp.celsius() + 20.0).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_temperature_big_endian() {
        for value in [0i16, 1, 215, 999, -1, -400, i16::MAX, i16::MIN] {
            let [hi, lo] = value.to_be_bytes();
            assert_eq!(
                decode(&[0x07, hi, lo]),
                Some(Reading::Temperature(TemperatureReading::from_tenths(value)))
            );
        }
    }

    #[test]
    fn test_battery_missing_payload() {
        assert_eq!(decode(&[0x0A]), None);
        assert_eq!(
            parse_packet(&[0x0A]),
            Err(DecodeError::Malformed {
                packet_id: 0x0A,
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_wrong_payload_lengths() {
        assert_eq!(decode(&[0x0A, 0x10, 0x20]), None);
        assert_eq!(decode(&[0x07]), None);
        assert_eq!(decode(&[0x07, 0x01]), None);
        assert_eq!(decode(&[0x07, 0x00, 0xC8, 0x00]), None);

        let err = parse_packet(&[0x07, 0x01]).unwrap_err();
        assert!(!err.is_routine());
        assert_eq!(
            err,
            DecodeError::Malformed {
                packet_id: 0x07,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_unrecognized_packets() {
        assert_eq!(decode(&[0x05, 0x01, 0x02, 0x03]), None);

        let err = parse_packet(&[0x05, 0x01, 0x02, 0x03]).unwrap_err();
        assert_eq!(err, DecodeError::Unrecognized { packet_id: 0x05 });
        assert!(err.is_routine());

        for packet_id in (0..=u8::MAX).filter(|id| ![0x0A, 0x07].contains(id)) {
            assert_eq!(decode(&[packet_id]), None);
            assert_eq!(decode(&[packet_id, 0x00]), None);
            assert_eq!(decode(&[packet_id, 0x00, 0xC8]), None);
        }
    }

    #[test]
    fn test_frame_delimiter() {
        assert_eq!(decode(&FRAME_DELIMITER), None);
        let err = parse_packet(&FRAME_DELIMITER).unwrap_err();
        assert_eq!(err, DecodeError::FrameDelimiter);
        assert!(err.is_routine());
    }

    #[test]
    fn test_empty_notification() {
        assert_eq!(decode(&[]), None);
        let err = parse_packet(&[]).unwrap_err();
        assert_eq!(err, DecodeError::Empty);
        assert!(!err.is_routine());
    }

    #[test]
    fn test_decode_is_idempotent() {
        let inputs: [&[u8]; 4] = [&[0x0A, 0x57], &[0x07, 0x00, 0xC8], &[0x0A], &[0x05, 0x01]];
        for input in inputs {
            assert_eq!(decode(input), decode(input));
        }
    }

    #[test]
    fn test_packet_id_from_u8() {
        assert_eq!(PacketId::from_u8(0x0A), Some(PacketId::BatterySoc));
        assert_eq!(PacketId::from_u8(0x07), Some(PacketId::Temperature));
        assert_eq!(PacketId::from_u8(0x08), Some(PacketId::PedalCadence));
        assert_eq!(PacketId::from_u8(0xEE), None);
        assert_eq!(PacketId::BatterySoc.payload_len(), Some(1));
        assert_eq!(PacketId::Temperature.payload_len(), Some(2));
        assert_eq!(PacketId::Voltage.payload_len(), None);
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::Unrecognized { packet_id: 0x05 };
        assert_eq!(format!("{err}"), "unrecognized packet id 0x05");

        let err = DecodeError::Malformed {
            packet_id: 0x0A,
            expected: 1,
            actual: 0,
        };
        assert_eq!(
            format!("{err}"),
            "malformed packet 0x0A: expected 1 payload byte(s), got 0"
        );
    }
}
