//! # Loko Gateway Library
//!
//! LoRa-to-BLE gateway for Loko trackers.
//!
//! This library receives tracker packets from a LoRa transceiver, decodes and
//! authenticates them, and relays the ones addressed to this gateway to a
//! paired phone over a BLE UART bridge. It also guards the battery, handles
//! the power button and keeps a bounded activity log.

pub mod ble;
pub mod board;
pub mod config;
pub mod console;
pub mod error;
pub mod gateway;
pub mod packet;
pub mod radio;
pub mod serial;
pub mod settings;
pub mod telemetry;
