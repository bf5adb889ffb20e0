//! # Error Types
//!
//! Custom error types for the Loko gateway using `thiserror`.

use thiserror::Error;

/// Main error type for the Loko gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The radio produced no response at all
    #[error("no signal from radio")]
    FrameAbsent,

    /// The radio response carried no usable payload
    #[error("malformed frame: {0}")]
    FrameMalformed(String),

    /// Checksum mismatch after decrypting a sealed block
    #[error("can't decrypt, possible wrong key or corrupted block")]
    AuthenticationFailed,

    /// Binary payload length matches none of the known layouts
    #[error("unknown frame length: {0} bytes")]
    UnknownFrameLength(usize),

    /// Persisted settings failed validation
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Relay attempted while the phone link is down, or the send failed
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// Battery, power or button peripheral misbehaved
    #[error("peripheral fault: {0}")]
    PeripheralFault(String),

    /// Serial port errors (radio or BLE bridge)
    #[error("serial error: {0}")]
    Serial(String),

    /// Configuration file parse errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Settings file (de)serialization errors
    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the Loko gateway
pub type Result<T> = std::result::Result<T, GatewayError>;
