//! # Configuration Module
//!
//! Handles loading and validating the host configuration from TOML files.
//!
//! Values the operator changes at runtime (device ID, frequency, key) live in
//! the persisted settings file instead, see [`crate::settings`].

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{GatewayError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub ble: BleConfig,
    #[serde(default)]
    pub gateway: GatewayLoopConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LoRa transceiver UART configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default = "default_radio_port")]
    pub port: String,

    #[serde(default = "default_uart_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_command_settle_ms")]
    pub command_settle_ms: u64,
}

/// BLE bridge module configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BleConfig {
    #[serde(default = "default_ble_port")]
    pub port: String,

    #[serde(default = "default_uart_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_device_name")]
    pub device_name: String,
}

/// Gateway loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayLoopConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_battery_report_interval_ticks")]
    pub battery_report_interval_ticks: u32,

    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

/// Battery protection and power button configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PowerConfig {
    #[serde(default = "default_low_battery_volts")]
    pub low_battery_volts: f64,

    #[serde(default = "default_full_battery_volts")]
    pub full_battery_volts: f64,

    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,

    #[serde(default = "default_battery_path")]
    pub battery_path: String,

    #[serde(default = "default_power_gpio_path")]
    pub power_gpio_path: String,

    #[serde(default = "default_indicator_gpio_path")]
    pub indicator_gpio_path: String,

    /// Blue LED showing the phone link state
    #[serde(default = "default_link_gpio_path")]
    pub link_gpio_path: String,

    /// evdev device for the power button; auto-detected when empty
    #[serde(default)]
    pub button_device: String,
}

/// Activity log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: String,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily-rolling diagnostic files; console only when empty
    #[serde(default)]
    pub dir: String,
}

// Default value functions
fn default_radio_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_ble_port() -> String { "/dev/ttyUSB1".to_string() }
fn default_uart_baud_rate() -> u32 { 9600 }
fn default_timeout_ms() -> u64 { 100 }
fn default_command_settle_ms() -> u64 { 1000 }
fn default_device_name() -> String { "LOKO".to_string() }

fn default_tick_ms() -> u64 { 100 }
fn default_battery_report_interval_ticks() -> u32 { 300 }
fn default_settings_path() -> String { "settings.json".to_string() }

fn default_low_battery_volts() -> f64 { 3.3 }
fn default_full_battery_volts() -> f64 { 4.2 }
fn default_long_press_ms() -> u64 { 2000 }
fn default_battery_path() -> String { "/sys/class/power_supply/BAT0/voltage_now".to_string() }
fn default_power_gpio_path() -> String { "/sys/class/gpio/gpio12/value".to_string() }
fn default_indicator_gpio_path() -> String { "/sys/class/gpio/gpio18/value".to_string() }
fn default_link_gpio_path() -> String { "/sys/class/gpio/gpio21/value".to_string() }

fn default_log_file() -> String { "lora_log.txt".to_string() }
fn default_max_entries() -> usize { 100 }

/// Baud rates accepted by the transceiver and the BLE bridge
const UART_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// Longest advertised name that still fits a 31-byte advertising payload
pub const MAX_DEVICE_NAME_LEN: usize = 29;

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: default_radio_port(),
            baud_rate: default_uart_baud_rate(),
            timeout_ms: default_timeout_ms(),
            command_settle_ms: default_command_settle_ms(),
        }
    }
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            port: default_ble_port(),
            baud_rate: default_uart_baud_rate(),
            device_name: default_device_name(),
        }
    }
}

impl Default for GatewayLoopConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            battery_report_interval_ticks: default_battery_report_interval_ticks(),
            settings_path: default_settings_path(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            low_battery_volts: default_low_battery_volts(),
            full_battery_volts: default_full_battery_volts(),
            long_press_ms: default_long_press_ms(),
            battery_path: default_battery_path(),
            power_gpio_path: default_power_gpio_path(),
            indicator_gpio_path: default_indicator_gpio_path(),
            link_gpio_path: default_link_gpio_path(),
            button_device: String::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            max_entries: default_max_entries(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> GatewayError {
    GatewayError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use loko_gateway::config::Config;
    ///
    /// let config = Config::load("config/gateway.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.radio.port.is_empty() {
            return Err(invalid("radio port cannot be empty"));
        }

        if self.ble.port.is_empty() {
            return Err(invalid("ble port cannot be empty"));
        }

        for (name, baud) in [("radio", self.radio.baud_rate), ("ble", self.ble.baud_rate)] {
            if !UART_BAUD_RATES.contains(&baud) {
                return Err(invalid(format!(
                    "{} baud_rate must be one of: 9600, 19200, 38400, 57600, 115200",
                    name
                )));
            }
        }

        if self.radio.timeout_ms == 0 || self.radio.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.radio.command_settle_ms > 10000 {
            return Err(invalid("command_settle_ms must be at most 10000"));
        }

        if self.ble.device_name.is_empty() || self.ble.device_name.len() > MAX_DEVICE_NAME_LEN {
            return Err(invalid(format!(
                "device_name must be between 1 and {} bytes",
                MAX_DEVICE_NAME_LEN
            )));
        }

        if self.gateway.tick_ms < 10 || self.gateway.tick_ms > 10000 {
            return Err(invalid("tick_ms must be between 10 and 10000"));
        }

        if self.gateway.battery_report_interval_ticks == 0 {
            return Err(invalid("battery_report_interval_ticks must be greater than 0"));
        }

        if self.gateway.settings_path.is_empty() {
            return Err(invalid("settings_path cannot be empty"));
        }

        if self.power.low_battery_volts <= 0.0 {
            return Err(invalid("low_battery_volts must be greater than 0"));
        }

        if self.power.full_battery_volts <= self.power.low_battery_volts {
            return Err(invalid("full_battery_volts must be greater than low_battery_volts"));
        }

        if self.power.long_press_ms == 0 || self.power.long_press_ms > 10000 {
            return Err(invalid("long_press_ms must be between 1 and 10000"));
        }

        if self.log.file.is_empty() {
            return Err(invalid("log file cannot be empty"));
        }

        if self.log.max_entries == 0 || self.log.max_entries > 10000 {
            return Err(invalid("max_entries must be between 1 and 10000"));
        }

        Ok(())
    }
}
