//! Battery voltage from sysfs and the percentage reported to the phone

use std::fs;
use std::path::{Path, PathBuf};

use super::BatterySensor;
use crate::error::{GatewayError, Result};

/// sysfs reports `voltage_now` in microvolts
const MICROVOLTS_PER_VOLT: f64 = 1_000_000.0;

/// Battery read from a power-supply `voltage_now` attribute
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    path: PathBuf,
}

impl SysfsBattery {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl BatterySensor for SysfsBattery {
    fn read_volts(&mut self) -> Result<f64> {
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            GatewayError::PeripheralFault(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let microvolts: i64 = raw.trim().parse().map_err(|_| {
            GatewayError::PeripheralFault(format!(
                "Unexpected battery reading {:?} in {}",
                raw.trim(),
                self.path.display()
            ))
        })?;

        Ok(microvolts as f64 / MICROVOLTS_PER_VOLT)
    }
}

/// Charge percentage between the cut-off and full voltages, two decimals
///
/// Not clamped: a battery above `full` reports more than 100.
///
/// # Examples
///
/// ```
/// use loko_gateway::board::battery_percent;
///
/// assert_eq!(battery_percent(3.75, 3.3, 4.2), 50.0);
/// ```
pub fn battery_percent(volts: f64, low: f64, full: f64) -> f64 {
    let percent = (volts - low) * 100.0 / (full - low);
    (percent * 100.0).round() / 100.0
}

/// Render a percentage the way the phone app expects (`50.0`, `13.33`)
pub fn format_percent(percent: f64) -> String {
    if percent.fract() == 0.0 {
        format!("{:.1}", percent)
    } else {
        format!("{}", percent)
    }
}
