use thiserror::Error;

/// Errors that can occur when monitoring a Hyena e-bike
#[derive(Error, Debug)]
pub enum HyenaError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No matching e-bike found during scanning
    #[error("Hyena e-bike not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected or the notification channel closed
    #[error("Device disconnected")]
    Disconnected,

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Protocol error, such as a missing service or characteristic
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A telemetry sink rejected an update
    #[error("Sink error: {0}")]
    Sink(String),

    /// A background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for Hyena operations
pub type Result<T> = std::result::Result<T, HyenaError>;

impl HyenaError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected | Self::DeviceNotFound
        )
    }

    /// Check if the caller may simply try again later
    ///
    /// The bike routinely drops out of range, so a missing device or a
    /// timed out connection attempt is not treated as permanent.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::DeviceNotFound | Self::Disconnected | Self::Sink(_)
        )
    }
}
