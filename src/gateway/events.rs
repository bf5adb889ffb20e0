//! Inputs delivered to the gateway loop from other tasks

use std::time::Instant;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Something that happened outside the loop, drained at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A phone connected to the BLE bridge
    LinkUp,
    /// The phone disconnected
    LinkDown,
    /// Power button went down at the given time
    ButtonPressed(Instant),
    /// Power button went up at the given time
    ButtonReleased(Instant),
    /// Operator asked the gateway to stop
    ExitRequested,
}

pub type EventSender = UnboundedSender<GatewayEvent>;
pub type EventReceiver = UnboundedReceiver<GatewayEvent>;

/// Create the event queue shared by the loop and its collaborators
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
