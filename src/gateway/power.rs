//! # Power Guard
//!
//! Battery protection and the long-press power toggle.
//!
//! - A reading strictly below the cut-off requests a power cut on every tick
//!   it is seen. The loop keeps running until hardware removes power.
//! - A press held for the confirm delay toggles power enable and the red
//!   indicator together. Releasing earlier does nothing.

use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::board::PowerOutputs;

/// Battery and button policy
#[derive(Debug, Clone)]
pub struct PowerGuard {
    low_battery_volts: f64,
    long_press: Duration,
    power_on: bool,
    indicator_on: bool,
    pressed_at: Option<Instant>,
}

impl PowerGuard {
    pub fn new(low_battery_volts: f64, long_press: Duration) -> Self {
        Self {
            low_battery_volts,
            long_press,
            power_on: false,
            indicator_on: false,
            pressed_at: None,
        }
    }

    /// Whether power enable is currently driven on
    pub fn power_on(&self) -> bool {
        self.power_on
    }

    /// Whether a press is waiting for confirmation
    pub fn press_pending(&self) -> bool {
        self.pressed_at.is_some()
    }

    /// Enable power and clear the indicator at start-up
    pub fn power_up(&mut self, outputs: &mut dyn PowerOutputs) {
        self.apply(true, false, outputs);
    }

    /// Request a power cut if `volts` is under the cut-off
    ///
    /// # Returns
    ///
    /// * `bool` - Whether a cut was requested
    pub fn check_battery(&mut self, volts: f64, outputs: &mut dyn PowerOutputs) -> bool {
        if volts >= self.low_battery_volts {
            return false;
        }

        warn!(
            "Battery level too low ({:.2} V). Cutting power to protect the cell",
            volts
        );
        self.power_on = false;
        if let Err(e) = outputs.set_power(false) {
            error!("Power cut request failed: {}", e);
        }
        true
    }

    pub fn on_button_pressed(&mut self, at: Instant) {
        self.pressed_at = Some(at);
    }

    /// Settle a pending press on release
    ///
    /// A press held for the confirm delay toggles power even when its release
    /// is drained before the tick that would have confirmed it.
    ///
    /// # Returns
    ///
    /// * `bool` - Whether power was toggled
    pub fn on_button_released(&mut self, at: Instant, outputs: &mut dyn PowerOutputs) -> bool {
        let Some(pressed) = self.pressed_at.take() else {
            return false;
        };
        info!("Button released");
        if at.saturating_duration_since(pressed) < self.long_press {
            return false;
        }
        self.toggle(outputs);
        true
    }

    /// Toggle power if the pending press has been held long enough
    ///
    /// # Returns
    ///
    /// * `bool` - Whether power was toggled
    pub fn poll_long_press(&mut self, now: Instant, outputs: &mut dyn PowerOutputs) -> bool {
        let Some(at) = self.pressed_at else {
            return false;
        };
        if now.saturating_duration_since(at) < self.long_press {
            return false;
        }

        self.pressed_at = None;
        self.toggle(outputs);
        true
    }

    fn toggle(&mut self, outputs: &mut dyn PowerOutputs) {
        let power = !self.power_on;
        let indicator = !self.indicator_on;
        self.apply(power, indicator, outputs);
        info!("Power value: {}", u8::from(power));
    }

    fn apply(&mut self, power: bool, indicator: bool, outputs: &mut dyn PowerOutputs) {
        self.power_on = power;
        self.indicator_on = indicator;
        if let Err(e) = outputs.set_power(power) {
            error!("Failed to drive power enable: {}", e);
        }
        if let Err(e) = outputs.set_indicator(indicator) {
            warn!("Failed to drive indicator: {}", e);
        }
    }
}
