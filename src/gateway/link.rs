//! Phone link state and the LED pattern that shows it

use std::time::{Duration, Instant};
use tracing::info;

/// Blink half-period while no phone is connected
pub const LINK_BLINK_PERIOD: Duration = Duration::from_millis(300);

/// How the link LED is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    /// Toggle every `period`
    Blink(Duration),
    /// Steady on
    Solid,
}

/// Whether a phone is connected
#[derive(Debug, Clone)]
pub struct ConnectionState {
    up: bool,
    /// Start of the current pattern, reset on every transition
    since: Instant,
}

impl ConnectionState {
    /// Start disconnected
    pub fn new(now: Instant) -> Self {
        Self { up: false, since: now }
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    /// Mark the link up; returns whether the state changed
    pub fn set_up(&mut self, now: Instant) -> bool {
        self.transition(true, now)
    }

    /// Mark the link down; returns whether the state changed
    pub fn set_down(&mut self, now: Instant) -> bool {
        self.transition(false, now)
    }

    fn transition(&mut self, up: bool, now: Instant) -> bool {
        if self.up == up {
            return false;
        }
        self.up = up;
        self.since = now;
        info!("{}", if up { "Connected" } else { "Disconnected" });
        true
    }

    pub fn pattern(&self) -> LedPattern {
        if self.up {
            LedPattern::Solid
        } else {
            LedPattern::Blink(LINK_BLINK_PERIOD)
        }
    }

    /// LED level at `now` for the current pattern
    pub fn led_on(&self, now: Instant) -> bool {
        match self.pattern() {
            LedPattern::Solid => true,
            LedPattern::Blink(period) => {
                let elapsed = now.saturating_duration_since(self.since).as_millis();
                (elapsed / period.as_millis().max(1)) % 2 == 0
            }
        }
    }
}
