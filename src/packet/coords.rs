//! # Coordinate Codec
//!
//! Fixed-point latitude/longitude fields used by the binary packet layouts.
//!
//! - **24-bit**: big-endian two's-complement, degrees × 10 000
//! - **32-bit**: big-endian two's-complement, degrees × 1 000 000
//!
//! Every 3- or 4-byte input is a valid coordinate, so both decoders are total.

/// Scale of the 24-bit coordinate encoding (4 decimal places)
pub const COORD24_SCALE: f64 = 10_000.0;

/// Scale of the 32-bit coordinate encoding (6 decimal places)
pub const COORD32_SCALE: f64 = 1_000_000.0;

/// Decode a 24-bit fixed-point coordinate
///
/// # Arguments
///
/// * `bytes` - Three big-endian bytes, sign bit is bit 23
///
/// # Examples
///
/// ```
/// use loko_gateway::packet::coords::decode24;
///
/// assert_eq!(decode24([0x06, 0x29, 0x1D]), 40.3741);
/// ```
pub fn decode24(bytes: [u8; 3]) -> f64 {
    // Place the 24-bit value in the top of an i32 and shift back to sign-extend
    let raw = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8;
    raw as f64 / COORD24_SCALE
}

/// Decode a 32-bit fixed-point coordinate
///
/// # Arguments
///
/// * `bytes` - Four big-endian bytes
pub fn decode32(bytes: [u8; 4]) -> f64 {
    i32::from_be_bytes(bytes) as f64 / COORD32_SCALE
}

/// Encode degrees into the 24-bit wire form (used by node simulators and tests)
pub fn encode24(degrees: f64) -> [u8; 3] {
    let raw = (degrees * COORD24_SCALE).round() as i32;
    let be = raw.to_be_bytes();
    [be[1], be[2], be[3]]
}

/// Encode degrees into the 32-bit wire form
pub fn encode32(degrees: f64) -> [u8; 4] {
    ((degrees * COORD32_SCALE).round() as i32).to_be_bytes()
}
