//! # Loko Gateway
//!
//! Receives Loko tracker packets over LoRa and relays them to a paired phone
//! over BLE.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load `config/gateway.toml` (or the path given as the first argument)
//!    - Set up logging, optionally to a daily-rolling file
//!    - Load persisted settings and the activity log
//!    - Open the radio and BLE UARTs, the battery, GPIOs and power button
//!
//! 2. **Main Loop**
//!    - One gateway tick every `tick_ms` (100 ms by default)
//!    - Operator console on stdin
//!
//! 3. **Shutdown**
//!    - `exit` on the console or Ctrl+C
//!    - The activity log is saved before the process ends

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use loko_gateway::ble::{self, BleBridge};
use loko_gateway::board::{ButtonWatcher, SysfsBattery, SysfsOutputs};
use loko_gateway::config::{Config, LoggingConfig};
use loko_gateway::console::Console;
use loko_gateway::gateway::{events, Gateway, Peripherals, SharedState};
use loko_gateway::radio::LoraRadio;
use loko_gateway::serial::open_stream;
use loko_gateway::settings::SettingsStore;
use loko_gateway::telemetry::logger::TelemetryLog;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/gateway.toml";

/// Diagnostics file name prefix inside `[logging] dir`
const LOG_FILE_PREFIX: &str = "loko-gateway.log";

/// Install the tracing subscriber
///
/// Returns the appender guard when file logging is enabled; it must live
/// until the process ends so buffered lines are flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    if config.dir.is_empty() {
        registry.init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let (config, config_error) = match Config::load(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let log_guard = init_logging(&config.logging);

    info!("Loko Gateway v{} starting...", env!("CARGO_PKG_VERSION"));
    match config_error {
        Some(e) => warn!("Using default configuration, {} not loaded: {}", config_path, e),
        None => info!("Loaded configuration from {}", config_path),
    }

    let settings = SettingsStore::load(&config.gateway.settings_path);
    let log = TelemetryLog::open(config.log.max_entries, &config.log.file);
    info!("Log manager initialized");

    let shared = SharedState {
        settings: Arc::new(Mutex::new(settings)),
        log: Arc::new(Mutex::new(log)),
    };
    let (event_tx, event_rx) = events::channel();

    let radio = LoraRadio::open(&config.radio)
        .with_context(|| format!("Failed to open LoRa radio at {}", config.radio.port))?;
    info!("LoRa radio opened at: {}", radio.device_path());

    let ble_stream = open_stream(&config.ble.port, config.ble.baud_rate)
        .with_context(|| format!("Failed to open BLE bridge at {}", config.ble.port))?;
    let (ble_reader, ble_writer) = tokio::io::split(ble_stream);
    tokio::spawn(ble::watch_status(ble_reader, event_tx.clone()));
    let sink = BleBridge::new(ble_writer, &config.ble.device_name);

    match ButtonWatcher::open(&config.power.button_device) {
        Ok(button) => {
            let tx = event_tx.clone();
            std::thread::spawn(move || button.run(tx));
        }
        Err(e) => warn!("Power button unavailable: {}", e),
    }

    let console = Console::new(shared.clone(), event_tx.clone());
    tokio::spawn(console.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()));

    let peripherals = Peripherals {
        radio,
        sink,
        battery: SysfsBattery::new(&config.power.battery_path),
        outputs: SysfsOutputs::from_config(&config.power),
    };
    let mut gateway = Gateway::new(&config, peripherals, shared, event_rx);
    gateway.start().await;
    gateway.run().await;

    info!("Loko Gateway stopped");
    drop(log_guard);

    // A pending stdin read would otherwise hold the runtime open
    std::process::exit(0);
}
