//! # BLE Relay Module
//!
//! The phone link is a UART BLE module exposing the Nordic UART Service.
//! Text written to the UART is notified on the TX characteristic; the module
//! reports link changes as status lines.
//!
//! ## Status lines
//!
//! - `+CONNECTED` - a central subscribed
//! - `+DISCONNECTED` - the central went away, advertising must restart
//!
//! Any other line is data the phone wrote to the RX characteristic.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::gateway::events::GatewayEvent;

/// Nordic UART Service
pub const NUS_SERVICE_UUID: &str = "6E400001-B5A3-F393-E0A9-E50E24DCCA9E";

/// Phone-to-gateway characteristic (write)
pub const NUS_RX_UUID: &str = "6E400002-B5A3-F393-E0A9-E50E24DCCA9E";

/// Gateway-to-phone characteristic (notify)
pub const NUS_TX_UUID: &str = "6E400003-B5A3-F393-E0A9-E50E24DCCA9E";

/// Legacy advertising payload limit
pub const MAX_ADVERTISING_LEN: usize = 31;

/// AD type: flags
const AD_TYPE_FLAGS: u8 = 0x01;

/// AD type: complete local name
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// LE General Discoverable, BR/EDR supported
const AD_FLAGS_GENERAL_DISCOVERABLE: u8 = 0x02;

const STATUS_CONNECTED: &str = "+CONNECTED";
const STATUS_DISCONNECTED: &str = "+DISCONNECTED";

/// Build the advertising payload for `name`
///
/// # Examples
///
/// ```
/// use loko_gateway::ble::advertising_payload;
///
/// assert_eq!(
///     advertising_payload("LOKO"),
///     vec![0x02, 0x01, 0x02, 0x05, 0x09, b'L', b'O', b'K', b'O']
/// );
/// ```
pub fn advertising_payload(name: &str) -> Vec<u8> {
    let name = name.as_bytes();
    let mut payload = Vec::with_capacity(5 + name.len());
    payload.extend_from_slice(&[0x02, AD_TYPE_FLAGS, AD_FLAGS_GENERAL_DISCOVERABLE]);
    payload.push((name.len() + 1) as u8);
    payload.push(AD_TYPE_COMPLETE_NAME);
    payload.extend_from_slice(name);
    payload
}

/// Map a module status line to a link event
pub fn parse_status_line(line: &str) -> Option<GatewayEvent> {
    match line.trim() {
        STATUS_CONNECTED => Some(GatewayEvent::LinkUp),
        STATUS_DISCONNECTED => Some(GatewayEvent::LinkDown),
        _ => None,
    }
}

/// Outgoing side of the phone link
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelaySink: Send {
    /// Notify the phone with one line of text
    async fn notify(&mut self, text: &str) -> Result<()>;

    /// (Re)start advertising
    async fn advertise(&mut self) -> Result<()>;
}

/// Writer half of the BLE bridge UART
pub struct BleBridge<W> {
    writer: W,
    device_name: String,
}

impl<W> std::fmt::Debug for BleBridge<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleBridge")
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin + Send> BleBridge<W> {
    pub fn new(writer: W, device_name: &str) -> Self {
        Self {
            writer,
            device_name: device_name.to_string(),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        self.writer
            .write_all(&data)
            .await
            .map_err(|e| GatewayError::RelayUnavailable(format!("BLE write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| GatewayError::RelayUnavailable(format!("BLE flush failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> RelaySink for BleBridge<W> {
    async fn notify(&mut self, text: &str) -> Result<()> {
        self.write_line(text).await?;
        debug!("BLE notify: {}", text);
        Ok(())
    }

    async fn advertise(&mut self) -> Result<()> {
        let payload = advertising_payload(&self.device_name);
        let command = format!("AT+ADVDATA={}", hex::encode_upper(&payload));
        self.write_line(&command).await?;
        info!("Advertising as {}", self.device_name);
        Ok(())
    }
}

/// Read module status lines and publish link changes
///
/// Runs until the reader hits end of file or fails, or the receiver is gone.
pub async fn watch_status<R>(reader: R, events: UnboundedSender<GatewayEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_status_line(&line) {
                Some(event) => {
                    info!("BLE status: {}", line.trim());
                    if events.send(event).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => debug!("Data from phone: {}", line.trim()),
            },
            Ok(None) => {
                warn!("BLE bridge closed");
                break;
            }
            Err(e) => {
                warn!("BLE bridge read failed: {}", e);
                break;
            }
        }
    }
}
