//! # Loko Packet Layouts and Types
//!
//! Wire-level definitions for every packet generation a Loko node can send,
//! and the normalized [`Telemetry`] record they decode into.
//!
//! ## Text family (payload is printable ASCII)
//!
//! | Fields | Layout |
//! |--------|--------|
//! | 5 | `id1,id2,lat,lon,vbat` |
//! | 7 | `id1,id2,lat,lon,alt,mps,vbat` |
//! | 3 | `id1,id2,<base64 AES block>` |
//!
//! ## Binary family (dispatch on byte length)
//!
//! | Length | Layout |
//! |--------|--------|
//! | 15 | `u32le id1, u32le id2, u8 ver/vbat, 3B lat, 3B lon` |
//! | 17 | `u32le id1, u32le id2, u8 ver/vbat, 4B lat, 4B lon` |
//! | 18 | 15-byte layout + `u8 speed, i16le alt` |
//! | 20 | 17-byte layout + `u8 speed, i16le alt` |
//! | 25 | `u32be id1, u32be id2, u8 version, 16B AES block` |
//!
//! The sealed 25-byte header is big-endian while every other multi-byte
//! scalar is little-endian. Coordinates are always big-endian fixed point.

use std::fmt;

/// Length of the 24-bit-coordinate plaintext layout
pub const COMPACT24_LEN: usize = 15;

/// Length of the 32-bit-coordinate plaintext layout
pub const COMPACT32_LEN: usize = 17;

/// Length of the 24-bit layout with speed and altitude
pub const EXTENDED24_LEN: usize = 18;

/// Length of the 32-bit layout with speed and altitude
pub const EXTENDED32_LEN: usize = 20;

/// Length of the sealed (AES) layout
pub const SEALED_LEN: usize = 25;

/// Size of the encrypted block in sealed layouts
pub const SEALED_BLOCK_LEN: usize = 16;

/// Sealed inner layout with 24-bit coordinates
pub const SEALED_LAYOUT_COORD24: u8 = 2;

/// Sealed inner layout with 32-bit coordinates
pub const SEALED_LAYOUT_COORD32: u8 = 5;

/// Offset added to the packed 4-bit battery value, in decivolts
pub const VBAT_OFFSET_DECIVOLTS: u8 = 27;

/// Packet generation a record was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// CSV with five fields
    TextLegacy,
    /// CSV with seven fields (altitude and speed)
    TextExtended,
    /// CSV with three fields, third one base64 ciphertext
    TextSealed,
    /// 15-byte binary
    Compact24,
    /// 17-byte binary
    Compact32,
    /// 18-byte binary
    Extended24,
    /// 20-byte binary
    Extended32,
    /// 25-byte binary with AES block
    Sealed,
}

impl FrameFormat {
    /// Whether packets of this format carry altitude and speed
    pub fn has_motion(&self) -> bool {
        !matches!(
            self,
            FrameFormat::TextLegacy | FrameFormat::Compact24 | FrameFormat::Compact32
        )
    }

    /// Whether packets of this format came through the text family
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            FrameFormat::TextLegacy | FrameFormat::TextExtended | FrameFormat::TextSealed
        )
    }
}

/// Latitude or longitude as carried by the packet
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinate {
    /// Decimal text exactly as the node sent it
    Exact(String),
    /// Fixed-point value from a binary layout
    Fixed(f64),
    /// IEEE single from the sealed text layout
    Float(f32),
}

impl Coordinate {
    /// Coordinate in degrees
    pub fn degrees(&self) -> f64 {
        match self {
            // Exact text is validated as a number when the packet is parsed
            Coordinate::Exact(text) => text.parse().unwrap_or(0.0),
            Coordinate::Fixed(value) => *value,
            Coordinate::Float(value) => f64::from(*value),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinate::Exact(text) => f.write_str(text),
            Coordinate::Fixed(value) => write!(f, "{}", value),
            Coordinate::Float(value) => write!(f, "{}", value),
        }
    }
}

/// Battery value; the unit depends on the packet generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatteryReading {
    /// Integer exactly as sent in a CSV packet
    Raw(i64),
    /// Millivolts from the sealed text layout
    Millivolts(u16),
    /// Volts recovered from the packed 4-bit binary field
    Volts(f64),
}

impl BatteryReading {
    /// Unpack the low nibble of a binary version/battery byte
    pub fn from_packed(version_vbat: u8) -> Self {
        let raw = version_vbat & 0x0F;
        BatteryReading::Volts(f64::from(raw + VBAT_OFFSET_DECIVOLTS) / 10.0)
    }
}

impl fmt::Display for BatteryReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryReading::Raw(value) => write!(f, "{}", value),
            BatteryReading::Millivolts(value) => write!(f, "{}", value),
            BatteryReading::Volts(value) => write!(f, "{:.1}", value),
        }
    }
}

/// Decoded telemetry from one packet
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Packet generation the record came from
    pub format: FrameFormat,
    /// Node family identifier
    pub id1: u32,
    /// Device identifier, compared against the gateway settings
    pub id2: u32,
    /// Latitude
    pub lat: Coordinate,
    /// Longitude
    pub lon: Coordinate,
    /// Battery value
    pub battery: BatteryReading,
    /// Altitude in meters, `None` for formats without it
    pub altitude_m: Option<i32>,
    /// Ground speed in m/s, `None` for formats without it
    pub speed_mps: Option<u32>,
    /// Top nibble of the binary version byte (informational)
    pub packet_version: Option<u8>,
}

impl Telemetry {
    /// Summary line written to the activity log
    ///
    /// ```text
    /// ID1=123, ID2=321, LAT=40.376123, LON=49.850848, VBAT=3420
    /// ```
    pub fn summary(&self) -> String {
        let mut line = format!(
            "ID1={}, ID2={}, LAT={}, LON={}, VBAT={}",
            self.id1, self.id2, self.lat, self.lon, self.battery
        );
        if self.format.has_motion() {
            line.push_str(&format!(
                ", ALT={}, MPS={}",
                self.altitude_m.unwrap_or(0),
                self.speed_mps.unwrap_or(0)
            ));
        }
        line
    }

    /// CSV rendering relayed to the phone for binary packets
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.id1,
            self.id2,
            self.lat,
            self.lon,
            self.battery,
            self.altitude_m.unwrap_or(0),
            self.speed_mps.unwrap_or(0)
        )
    }
}

/// Fixed header shared by the plaintext binary layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryHeader {
    pub id1: u32,
    pub id2: u32,
    /// High nibble: packet version. Low nibble: packed battery.
    pub version_vbat: u8,
}

impl BinaryHeader {
    /// Packet-format version (high nibble)
    pub fn version(&self) -> u8 {
        self.version_vbat >> 4
    }
}

/// One variant per wire layout, before any decryption or scaling
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    TextLegacy {
        id1: u32,
        id2: u32,
        lat: String,
        lon: String,
        vbat: i64,
    },
    TextExtended {
        id1: u32,
        id2: u32,
        lat: String,
        lon: String,
        alt: i32,
        mps: u32,
        vbat: i64,
    },
    TextSealed {
        id1: u32,
        id2: u32,
        ciphertext: Vec<u8>,
    },
    Compact24 {
        header: BinaryHeader,
        lat: [u8; 3],
        lon: [u8; 3],
    },
    Compact32 {
        header: BinaryHeader,
        lat: [u8; 4],
        lon: [u8; 4],
    },
    Extended24 {
        header: BinaryHeader,
        lat: [u8; 3],
        lon: [u8; 3],
        speed: u8,
        alt: i16,
    },
    Extended32 {
        header: BinaryHeader,
        lat: [u8; 4],
        lon: [u8; 4],
        speed: u8,
        alt: i16,
    },
    Sealed {
        id1: u32,
        id2: u32,
        version: u8,
        block: [u8; SEALED_BLOCK_LEN],
    },
}

impl DecodedFrame {
    /// Packet generation of this frame
    pub fn format(&self) -> FrameFormat {
        match self {
            DecodedFrame::TextLegacy { .. } => FrameFormat::TextLegacy,
            DecodedFrame::TextExtended { .. } => FrameFormat::TextExtended,
            DecodedFrame::TextSealed { .. } => FrameFormat::TextSealed,
            DecodedFrame::Compact24 { .. } => FrameFormat::Compact24,
            DecodedFrame::Compact32 { .. } => FrameFormat::Compact32,
            DecodedFrame::Extended24 { .. } => FrameFormat::Extended24,
            DecodedFrame::Extended32 { .. } => FrameFormat::Extended32,
            DecodedFrame::Sealed { .. } => FrameFormat::Sealed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_record() -> Telemetry {
        Telemetry {
            format: FrameFormat::TextLegacy,
            id1: 123,
            id2: 321,
            lat: Coordinate::Exact("40.376123".to_string()),
            lon: Coordinate::Exact("49.850848".to_string()),
            battery: BatteryReading::Raw(3420),
            altitude_m: None,
            speed_mps: None,
            packet_version: None,
        }
    }

    #[test]
    fn test_layout_lengths() {
        assert_eq!(COMPACT24_LEN, 4 + 4 + 1 + 3 + 3);
        assert_eq!(COMPACT32_LEN, 4 + 4 + 1 + 4 + 4);
        assert_eq!(EXTENDED24_LEN, COMPACT24_LEN + 1 + 2);
        assert_eq!(EXTENDED32_LEN, COMPACT32_LEN + 1 + 2);
        assert_eq!(SEALED_LEN, 4 + 4 + 1 + SEALED_BLOCK_LEN);
    }

    #[test]
    fn test_battery_unpacking() {
        assert_eq!(BatteryReading::from_packed(0x00), BatteryReading::Volts(2.7));
        assert_eq!(BatteryReading::from_packed(0x3C), BatteryReading::Volts(3.9));
        assert_eq!(BatteryReading::from_packed(0xFF), BatteryReading::Volts(4.2));
    }

    #[test]
    fn test_battery_display() {
        assert_eq!(BatteryReading::Raw(3420).to_string(), "3420");
        assert_eq!(BatteryReading::Millivolts(3900).to_string(), "3900");
        assert_eq!(BatteryReading::Volts(3.9).to_string(), "3.9");
    }

    #[test]
    fn test_exact_coordinate_keeps_digits() {
        let lat = Coordinate::Exact("50.511725".to_string());
        assert_eq!(lat.to_string(), "50.511725");
        assert!((lat.degrees() - 50.511725).abs() < 1e-9);
    }

    #[test]
    fn test_summary_without_motion() {
        assert_eq!(
            legacy_record().summary(),
            "ID1=123, ID2=321, LAT=40.376123, LON=49.850848, VBAT=3420"
        );
    }

    #[test]
    fn test_summary_with_motion() {
        let mut record = legacy_record();
        record.format = FrameFormat::TextExtended;
        record.altitude_m = Some(117);
        record.speed_mps = Some(3);
        assert!(record.summary().ends_with(", ALT=117, MPS=3"));
    }

    #[test]
    fn test_csv_renders_missing_motion_as_zero() {
        let mut record = legacy_record();
        record.format = FrameFormat::Compact24;
        record.lat = Coordinate::Fixed(40.3761);
        record.lon = Coordinate::Fixed(-49.8508);
        record.battery = BatteryReading::Volts(3.9);
        assert_eq!(record.to_csv(), "123,321,40.3761,-49.8508,3.9,0,0");
    }

    #[test]
    fn test_format_flags() {
        assert!(!FrameFormat::TextLegacy.has_motion());
        assert!(!FrameFormat::Compact32.has_motion());
        assert!(FrameFormat::Extended24.has_motion());
        assert!(FrameFormat::Sealed.has_motion());
        assert!(FrameFormat::TextSealed.is_text());
        assert!(!FrameFormat::Sealed.is_text());
    }

    #[test]
    fn test_header_version_nibble() {
        let header = BinaryHeader { id1: 1, id2: 2, version_vbat: 0x3C };
        assert_eq!(header.version(), 3);
    }
}
