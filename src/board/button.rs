//! # Power Button
//!
//! Watches an evdev input device that reports `KEY_POWER` and turns its
//! edges into gateway events. Press time is stamped when the edge is read so
//! the long-press check does not depend on when the loop drains the queue.

use evdev::{Device, InputEventKind, Key};
use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::gateway::events::GatewayEvent;

/// evdev key value for a press
const KEY_DOWN: i32 = 1;

/// evdev key value for a release
const KEY_UP: i32 = 0;

/// Map a key edge to a gateway event; autorepeat and other keys map to `None`
pub fn button_event(key: Key, value: i32, now: Instant) -> Option<GatewayEvent> {
    if key != Key::KEY_POWER {
        return None;
    }
    match value {
        KEY_DOWN => Some(GatewayEvent::ButtonPressed(now)),
        KEY_UP => Some(GatewayEvent::ButtonReleased(now)),
        _ => None,
    }
}

/// Power button input device
pub struct ButtonWatcher {
    device: Device,
    device_path: String,
}

impl std::fmt::Debug for ButtonWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ButtonWatcher")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl ButtonWatcher {
    /// Open the configured device, or scan `/dev/input` when `path` is empty
    ///
    /// # Errors
    ///
    /// Returns `PeripheralFault` if no device reports `KEY_POWER`
    pub fn open(path: &str) -> Result<Self> {
        if !path.is_empty() {
            let device = Device::open(path)
                .map_err(|e| GatewayError::PeripheralFault(format!("Failed to open {}: {}", path, e)))?;
            info!("Using power button at: {}", path);
            return Ok(Self {
                device,
                device_path: path.to_string(),
            });
        }
        Self::scan()
    }

    fn scan() -> Result<Self> {
        let input_dir = Path::new("/dev/input");

        let mut entries: Vec<_> = std::fs::read_dir(input_dir)
            .map_err(|e| GatewayError::PeripheralFault(format!("Failed to read /dev/input: {}", e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().starts_with("event"))
                    .unwrap_or(false)
            })
            .collect();

        // Deterministic pick when several devices report the key
        entries.sort();

        for path in entries {
            match Device::open(&path) {
                Ok(device) => {
                    let has_power_key = device
                        .supported_keys()
                        .map(|keys| keys.contains(Key::KEY_POWER))
                        .unwrap_or(false);

                    debug!(
                        "Found input device: {} ({})",
                        path.display(),
                        device.name().unwrap_or("unnamed")
                    );

                    if has_power_key {
                        let device_path = path.to_string_lossy().to_string();
                        info!("Found power button at: {}", device_path);
                        return Ok(Self { device, device_path });
                    }
                }
                Err(e) => debug!("Could not open {}: {}", path.display(), e),
            }
        }

        Err(GatewayError::PeripheralFault(
            "no input device reports KEY_POWER".to_string(),
        ))
    }

    /// Get the device path of the button
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Forward button edges until the device fails or the receiver is gone
    ///
    /// Blocks the calling thread; run it on a dedicated thread.
    pub fn run(mut self, events: UnboundedSender<GatewayEvent>) {
        loop {
            let batch = match self.device.fetch_events() {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Power button read failed: {}", e);
                    return;
                }
            };

            for event in batch {
                let InputEventKind::Key(key) = event.kind() else {
                    continue;
                };
                if let Some(gateway_event) = button_event(key, event.value(), Instant::now()) {
                    if events.send(gateway_event).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
