//! sysfs GPIO outputs

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::PowerOutputs;
use crate::config::PowerConfig;
use crate::error::{GatewayError, Result};

/// One exported GPIO driven through its `value` attribute
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    path: PathBuf,
}

impl SysfsGpio {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Drive the line high or low
    pub fn set(&self, high: bool) -> Result<()> {
        let value = if high { "1" } else { "0" };
        fs::write(&self.path, value).map_err(|e| {
            GatewayError::PeripheralFault(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        debug!("{} <- {}", self.path.display(), value);
        Ok(())
    }
}

/// Power enable, red indicator and blue link LED
#[derive(Debug, Clone)]
pub struct SysfsOutputs {
    power: SysfsGpio,
    indicator: SysfsGpio,
    link: SysfsGpio,
}

impl SysfsOutputs {
    pub fn from_config(config: &PowerConfig) -> Self {
        Self {
            power: SysfsGpio::new(&config.power_gpio_path),
            indicator: SysfsGpio::new(&config.indicator_gpio_path),
            link: SysfsGpio::new(&config.link_gpio_path),
        }
    }
}

impl PowerOutputs for SysfsOutputs {
    fn set_power(&mut self, on: bool) -> Result<()> {
        self.power.set(on)
    }

    fn set_indicator(&mut self, on: bool) -> Result<()> {
        self.indicator.set(on)
    }

    fn set_link_led(&mut self, on: bool) -> Result<()> {
        self.link.set(on)
    }
}
