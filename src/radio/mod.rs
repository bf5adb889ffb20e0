//! # LoRa Radio Module
//!
//! Drives a LoRa-E5 style transceiver through its AT command set.
//!
//! The modem is put in test mode, tuned, and left in continuous receive:
//!
//! ```text
//! AT+MODE=TEST
//! AT+TEST=RFCFG,868,SF12,125,12,15,14,ON,OFF,OFF
//! AT+TEST=RXLRPKT
//! ```
//!
//! Received packets then arrive unsolicited as
//! `+TEST: RX "<hex payload>"` lines. [`RadioLink::poll`] only hands out
//! complete lines; a reception split across reads is held back until its
//! line end arrives.

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RadioConfig;
use crate::error::{GatewayError, Result};
use crate::serial::port_trait::{SerialPortIO, TokioSerialPort};
use crate::serial::{bytes_to_text, open_port};

/// Switch the modem to point-to-point test mode
pub const CMD_TEST_MODE: &str = "AT+MODE=TEST";

/// Enter continuous receive
pub const CMD_RECEIVE: &str = "AT+TEST=RXLRPKT";

/// Delay after entering receive before reading the acknowledgement
const RECEIVE_SETTLE: Duration = Duration::from_millis(500);

/// Longest unterminated text kept between polls
const MAX_PENDING_LEN: usize = 1024;

/// Build the RF configuration command for a frequency
///
/// Spreading factor 12, 125 kHz bandwidth, coding rate 4/5 (12), preamble 15,
/// 14 dBm, CRC on, IQ inversion off, public network off.
///
/// # Examples
///
/// ```
/// use loko_gateway::radio::rf_config_command;
///
/// assert_eq!(
///     rf_config_command(868_000_000),
///     "AT+TEST=RFCFG,868,SF12,125,12,15,14,ON,OFF,OFF"
/// );
/// ```
pub fn rf_config_command(freq_hz: u32) -> String {
    format!(
        "AT+TEST=RFCFG,{},SF12,125,12,15,14,ON,OFF,OFF",
        freq_hz / 1_000_000
    )
}

/// Source of raw transceiver responses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioLink: Send {
    /// Read the transceiver's complete lines within its bounded timeout
    ///
    /// # Returns
    ///
    /// * `Result<Option<String>>` - Response lines, `None` when no full line is available
    async fn poll(&mut self) -> Result<Option<String>>;

    /// Tune to `freq_hz` and (re)enter continuous receive
    async fn tune(&mut self, freq_hz: u32) -> Result<()>;
}

/// LoRa transceiver on a UART
pub struct LoraRadio<P: SerialPortIO> {
    port: P,
    device_path: String,
    read_timeout: Duration,
    command_settle: Duration,
    pending: BytesMut,
}

impl<P: SerialPortIO> std::fmt::Debug for LoraRadio<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoraRadio")
            .field("device_path", &self.device_path)
            .field("read_timeout", &self.read_timeout)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl LoraRadio<TokioSerialPort> {
    /// Open the transceiver UART described by `config`
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use loko_gateway::config::RadioConfig;
    /// use loko_gateway::radio::LoraRadio;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let mut radio = LoraRadio::open(&RadioConfig::default())?;
    ///     radio.configure(868_000_000).await?;
    ///     radio.start_receive().await?;
    ///     Ok(())
    /// }
    /// ```
    pub fn open(config: &RadioConfig) -> Result<Self> {
        let port = open_port(&config.port, config.baud_rate)?;
        Ok(Self::with_port(
            port,
            &config.port,
            Duration::from_millis(config.timeout_ms),
            Duration::from_millis(config.command_settle_ms),
        ))
    }
}

impl<P: SerialPortIO> LoraRadio<P> {
    /// Wrap an already opened port
    pub fn with_port(port: P, device_path: &str, read_timeout: Duration, command_settle: Duration) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
            read_timeout,
            command_settle,
            pending: BytesMut::new(),
        }
    }

    /// Device path of the transceiver UART
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Write one AT command
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        self.port
            .write_all(command.as_bytes())
            .await
            .map_err(|e| GatewayError::Serial(format!("Failed to write command: {}", e)))?;

        self.port
            .flush()
            .await
            .map_err(|e| GatewayError::Serial(format!("Failed to flush serial port: {}", e)))?;

        debug!("Sent radio command: {}", command);
        Ok(())
    }

    /// Send a command, wait `settle`, and return the reply
    async fn exchange(&mut self, command: &str, settle: Duration) -> Result<Option<String>> {
        self.pending.clear();
        self.send_command(command).await?;
        tokio::time::sleep(settle).await;
        let data = self.read_raw().await?;
        let reply = (!data.is_empty()).then(|| bytes_to_text(&data));
        info!("Lora Resp: {}", reply.as_deref().unwrap_or("<none>"));
        Ok(reply)
    }

    /// Put the modem in test mode and tune it
    ///
    /// # Arguments
    ///
    /// * `freq_hz` - Carrier frequency in Hz, sent to the modem in whole MHz
    pub async fn configure(&mut self, freq_hz: u32) -> Result<()> {
        self.exchange(CMD_TEST_MODE, self.command_settle).await?;
        self.exchange(&rf_config_command(freq_hz), self.command_settle).await?;
        info!("Radio tuned to {} Hz", freq_hz);
        Ok(())
    }

    /// Enter continuous receive
    pub async fn start_receive(&mut self) -> Result<()> {
        self.exchange(CMD_RECEIVE, RECEIVE_SETTLE).await?;
        Ok(())
    }

    async fn read_raw(&mut self) -> Result<Vec<u8>> {
        self.port
            .read_available(self.read_timeout)
            .await
            .map_err(|e| GatewayError::Serial(format!("Failed to read radio: {}", e)))
    }

    /// Take every complete line buffered so far, leaving a trailing partial line
    fn take_lines(&mut self) -> Option<String> {
        let Some(end) = self.pending.iter().rposition(|&b| b == b'\n') else {
            if self.pending.len() > MAX_PENDING_LEN {
                warn!("Discarding {} radio bytes without a line end", self.pending.len());
                self.pending.clear();
            }
            return None;
        };
        let lines = self.pending.split_to(end + 1);
        Some(bytes_to_text(&lines))
    }
}

#[async_trait]
impl<P: SerialPortIO> RadioLink for LoraRadio<P> {
    async fn poll(&mut self) -> Result<Option<String>> {
        let data = self.read_raw().await?;
        self.pending.extend_from_slice(&data);

        let response = self.take_lines();
        if let Some(text) = &response {
            debug!("LoraRx: {:?}", text);
        } else if !self.pending.is_empty() {
            debug!("Waiting for the rest of a radio line ({} bytes)", self.pending.len());
        }
        Ok(response)
    }

    async fn tune(&mut self, freq_hz: u32) -> Result<()> {
        self.configure(freq_hz).await?;
        self.start_receive().await
    }
}
