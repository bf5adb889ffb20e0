//! # Serial Communication Module
//!
//! Opens the UARTs the gateway talks to: the LoRa transceiver and the BLE
//! bridge module. Both run 8N1 without flow control.

pub mod port_trait;

use crate::error::{GatewayError, Result};
use port_trait::TokioSerialPort;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

/// Open a UART with the gateway's line settings
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyUSB0")
/// * `baud_rate` - Line speed
///
/// # Returns
///
/// * `Result<TokioSerialPort>` - Opened port
///
/// # Errors
///
/// Returns `Serial` if the device cannot be opened
///
/// # Examples
///
/// ```no_run
/// use loko_gateway::serial::open_port;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let port = open_port("/dev/ttyUSB0", 9600)?;
///     Ok(())
/// }
/// ```
pub fn open_port(path: &str, baud_rate: u32) -> Result<TokioSerialPort> {
    Ok(TokioSerialPort::new(open_stream(path, baud_rate)?))
}

/// Open a UART as a raw stream, for callers that split it into halves
pub fn open_stream(path: &str, baud_rate: u32) -> Result<SerialStream> {
    debug!("Trying to open serial port: {} at {} baud", path, baud_rate);

    let stream = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| GatewayError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened serial port {} at {} baud", path, baud_rate);
    Ok(stream)
}

/// Decode UART bytes as text without failing on invalid UTF-8
pub fn bytes_to_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
