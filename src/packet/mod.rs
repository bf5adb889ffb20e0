//! # Loko Packet Module
//!
//! Decoding and authentication of packets received from Loko tracking nodes.
//!
//! This module handles:
//! - Extracting the hex payload from transceiver responses
//! - Telling CSV text packets from binary ones
//! - Dispatching binary packets by length (15/17/18/20/25 bytes)
//! - Fixed-point coordinate decoding
//! - AES-ECB decryption and additive checksum verification

pub mod protocol;
pub mod decoder;
pub mod coords;
pub mod checksum;
pub mod cipher;
