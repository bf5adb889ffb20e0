//! # Board Peripherals
//!
//! Battery sensing, power and LED outputs, and the power button on a Linux
//! host. Each is reached through sysfs or evdev and hidden behind a trait so
//! the gateway loop can be driven by mocks.

pub mod battery;
pub mod button;
pub mod gpio;

use crate::error::Result;

/// Battery voltage source
#[cfg_attr(test, mockall::automock)]
pub trait BatterySensor: Send {
    /// Current battery voltage in volts
    ///
    /// # Errors
    ///
    /// Returns `PeripheralFault` if the sensor cannot be read
    fn read_volts(&mut self) -> Result<f64>;
}

/// Outputs owned by the gateway loop
#[cfg_attr(test, mockall::automock)]
pub trait PowerOutputs: Send {
    /// Drive the power-enable line
    fn set_power(&mut self, on: bool) -> Result<()>;

    /// Drive the red status indicator
    fn set_indicator(&mut self, on: bool) -> Result<()>;

    /// Drive the blue link LED
    fn set_link_led(&mut self, on: bool) -> Result<()>;
}

pub use battery::{battery_percent, format_percent, SysfsBattery};
pub use button::ButtonWatcher;
pub use gpio::{SysfsGpio, SysfsOutputs};
