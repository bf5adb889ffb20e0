//! # Telemetry Module
//!
//! Bounded activity log of decoded packets.
//!
//! This module handles:
//! - Timestamping and appending summary lines
//! - Evicting the oldest entries beyond the configured capacity
//! - Mirroring entries to a plain-text file (`[timestamp] data` per line)
//! - Restoring the newest entries from that file at startup

pub mod logger;
