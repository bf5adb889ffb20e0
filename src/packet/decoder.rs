//! # Loko Packet Decoder
//!
//! Turns a raw radio response into a [`Telemetry`] record.
//!
//! Decoding happens in three steps:
//! 1. [`extract_payload`] pulls the quoted hex string after the `RX` token
//! 2. [`classify`] builds a [`DecodedFrame`] for exactly one wire layout
//! 3. [`PacketDecoder::resolve`] decrypts, verifies and scales the fields

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Buf;
use tracing::{debug, warn};

use super::checksum;
use super::cipher::PresharedCipher;
use super::coords::{decode24, decode32};
use super::protocol::*;
use crate::error::{GatewayError, Result};

/// Token the transceiver puts in front of a received payload
const RX_TOKEN: &str = "RX";

/// Printable ASCII range used to tell text payloads from binary ones
const PRINTABLE: std::ops::RangeInclusive<u8> = 32..=126;

/// A decoded packet together with the text relayed to the phone
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    /// Normalized record
    pub telemetry: Telemetry,
    /// CSV text for the phone (verbatim for text packets)
    pub message: String,
}

/// Extract the hex payload from a transceiver response
///
/// The transceiver reports a reception as
/// `+TEST: RX "30302C3030302C..."`, possibly after other status lines.
///
/// # Returns
///
/// * `Option<&str>` - Text between the quotes following the last `RX` token
///
/// # Examples
///
/// ```
/// use loko_gateway::packet::decoder::extract_payload;
///
/// let response = "+TEST: LEN:5, RSSI:-35, SNR:12\r\n+TEST: RX \"3132\"\r\n";
/// assert_eq!(extract_payload(response), Some("3132"));
/// assert_eq!(extract_payload("+TEST: RXLRPKT"), None);
/// ```
pub fn extract_payload(response: &str) -> Option<&str> {
    let tokens: Vec<&str> = response.split_whitespace().collect();
    let rx = tokens.iter().rposition(|&token| token == RX_TOKEN)?;
    let quoted = tokens.get(rx + 1)?.strip_prefix('"')?;
    let end = quoted.find('"')?;
    Some(&quoted[..end])
}

/// Check whether a hex payload decodes to printable ASCII text
///
/// True only if every character is a hex digit, the length is even and every
/// decoded byte lies in `32..=126`. Anything else belongs to the binary family.
pub fn is_text_payload(payload: &str) -> bool {
    if payload.len() % 2 != 0 {
        return false;
    }
    match hex::decode(payload) {
        Ok(bytes) => bytes.iter().all(|byte| PRINTABLE.contains(byte)),
        Err(_) => false,
    }
}

/// Classify a hex payload into its wire layout
///
/// # Returns
///
/// * `Result<(DecodedFrame, Option<String>)>` - The frame, plus the decoded
///   text for text-family payloads
///
/// # Errors
///
/// - `FrameMalformed` for undecodable hex or unparseable CSV
/// - `UnknownFrameLength` for binary payloads of an unsupported length
pub fn classify(payload: &str) -> Result<(DecodedFrame, Option<String>)> {
    if is_text_payload(payload) {
        let bytes = hex::decode(payload)
            .map_err(|e| GatewayError::FrameMalformed(format!("invalid hex: {}", e)))?;
        // Printable ASCII is always valid UTF-8
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let frame = parse_text(&text)?;
        Ok((frame, Some(text)))
    } else {
        let bytes = hex::decode(payload)
            .map_err(|e| GatewayError::FrameMalformed(format!("invalid hex: {}", e)))?;
        Ok((parse_binary(&bytes)?, None))
    }
}

/// Parse a CSV text packet
///
/// # Errors
///
/// Returns `FrameMalformed` for an unsupported field count or a field that
/// is not a number.
pub fn parse_text(text: &str) -> Result<DecodedFrame> {
    let fields: Vec<&str> = text.split(',').map(str::trim).collect();

    match fields.len() {
        5 => Ok(DecodedFrame::TextLegacy {
            id1: parse_field(fields[0], "id1")?,
            id2: parse_field(fields[1], "id2")?,
            lat: parse_coordinate(fields[2], "lat")?,
            lon: parse_coordinate(fields[3], "lon")?,
            vbat: parse_field(fields[4], "vbat")?,
        }),
        7 => Ok(DecodedFrame::TextExtended {
            id1: parse_field(fields[0], "id1")?,
            id2: parse_field(fields[1], "id2")?,
            lat: parse_coordinate(fields[2], "lat")?,
            lon: parse_coordinate(fields[3], "lon")?,
            alt: parse_field(fields[4], "alt")?,
            mps: parse_field(fields[5], "mps")?,
            vbat: parse_field(fields[6], "vbat")?,
        }),
        3 => {
            let ciphertext = STANDARD
                .decode(fields[2])
                .map_err(|e| GatewayError::FrameMalformed(format!("invalid base64: {}", e)))?;
            Ok(DecodedFrame::TextSealed {
                id1: parse_field(fields[0], "id1")?,
                id2: parse_field(fields[1], "id2")?,
                ciphertext,
            })
        }
        n => Err(GatewayError::FrameMalformed(format!(
            "unsupported text packet with {} fields",
            n
        ))),
    }
}

/// Parse a binary packet by its length
///
/// # Errors
///
/// Returns `UnknownFrameLength` unless the length is 15, 17, 18, 20 or 25.
pub fn parse_binary(data: &[u8]) -> Result<DecodedFrame> {
    let mut buf = data;

    match data.len() {
        COMPACT24_LEN => {
            let header = read_header(&mut buf);
            Ok(DecodedFrame::Compact24 {
                header,
                lat: take(&mut buf),
                lon: take(&mut buf),
            })
        }
        COMPACT32_LEN => {
            let header = read_header(&mut buf);
            Ok(DecodedFrame::Compact32 {
                header,
                lat: take(&mut buf),
                lon: take(&mut buf),
            })
        }
        EXTENDED24_LEN => {
            let header = read_header(&mut buf);
            Ok(DecodedFrame::Extended24 {
                header,
                lat: take(&mut buf),
                lon: take(&mut buf),
                speed: buf.get_u8(),
                alt: buf.get_i16_le(),
            })
        }
        EXTENDED32_LEN => {
            let header = read_header(&mut buf);
            Ok(DecodedFrame::Extended32 {
                header,
                lat: take(&mut buf),
                lon: take(&mut buf),
                speed: buf.get_u8(),
                alt: buf.get_i16_le(),
            })
        }
        SEALED_LEN => Ok(DecodedFrame::Sealed {
            // Sealed frames carry a big-endian header
            id1: buf.get_u32(),
            id2: buf.get_u32(),
            version: buf.get_u8(),
            block: take(&mut buf),
        }),
        n => Err(GatewayError::UnknownFrameLength(n)),
    }
}

/// Read the little-endian header of the plaintext binary layouts
fn read_header(buf: &mut &[u8]) -> BinaryHeader {
    BinaryHeader {
        id1: buf.get_u32_le(),
        id2: buf.get_u32_le(),
        version_vbat: buf.get_u8(),
    }
}

/// Copy the next `N` bytes out of the buffer
fn take<const N: usize>(buf: &mut &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    out
}

fn parse_field<T: std::str::FromStr>(field: &str, name: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| GatewayError::FrameMalformed(format!("invalid {} field: {:?}", name, field)))
}

/// Validate a decimal coordinate but keep its original text
fn parse_coordinate(field: &str, name: &str) -> Result<String> {
    parse_field::<f64>(field, name)?;
    Ok(field.to_string())
}

/// Packet decoder holding the gateway's pre-shared key
#[derive(Debug, Clone)]
pub struct PacketDecoder {
    cipher: PresharedCipher,
}

impl PacketDecoder {
    /// Create a decoder for the given pre-shared key
    pub fn new(key: &[u8; super::cipher::KEY_SIZE]) -> Self {
        Self {
            cipher: PresharedCipher::new(key),
        }
    }

    /// Decode a raw transceiver response
    ///
    /// # Arguments
    ///
    /// * `response` - Text read from the radio, `None` if nothing arrived
    ///
    /// # Errors
    ///
    /// - `FrameAbsent` when there was no response
    /// - `FrameMalformed` when the response has no `RX` payload or the payload
    ///   cannot be parsed
    /// - `UnknownFrameLength` for unsupported binary lengths
    /// - `AuthenticationFailed` when a decrypted block fails its checksum
    pub fn decode(&self, response: Option<&str>) -> Result<DecodedPacket> {
        let response = response.ok_or(GatewayError::FrameAbsent)?;
        let payload = extract_payload(response).ok_or_else(|| {
            GatewayError::FrameMalformed("response carries no RX payload".to_string())
        })?;
        self.decode_payload(payload)
    }

    /// Decode an already extracted hex payload
    pub fn decode_payload(&self, payload: &str) -> Result<DecodedPacket> {
        let (frame, text) = classify(payload)?;
        debug!("Classified payload as {:?}", frame.format());

        let telemetry = self.resolve(frame)?;
        let message = text.unwrap_or_else(|| telemetry.to_csv());
        Ok(DecodedPacket { telemetry, message })
    }

    /// Turn a classified frame into a telemetry record
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if a sealed block fails its checksum.
    pub fn resolve(&self, frame: DecodedFrame) -> Result<Telemetry> {
        let format = frame.format();

        let telemetry = match frame {
            DecodedFrame::TextLegacy { id1, id2, lat, lon, vbat } => Telemetry {
                format,
                id1,
                id2,
                lat: Coordinate::Exact(lat),
                lon: Coordinate::Exact(lon),
                battery: BatteryReading::Raw(vbat),
                altitude_m: None,
                speed_mps: None,
                packet_version: None,
            },
            DecodedFrame::TextExtended { id1, id2, lat, lon, alt, mps, vbat } => Telemetry {
                format,
                id1,
                id2,
                lat: Coordinate::Exact(lat),
                lon: Coordinate::Exact(lon),
                battery: BatteryReading::Raw(vbat),
                altitude_m: Some(alt),
                speed_mps: Some(mps),
                packet_version: None,
            },
            DecodedFrame::TextSealed { id1, id2, ciphertext } => {
                let plain = self.open(&ciphertext)?;
                if plain.len() != SEALED_BLOCK_LEN {
                    return Err(GatewayError::FrameMalformed(format!(
                        "sealed text block is {} bytes, expected {}",
                        plain.len(),
                        SEALED_BLOCK_LEN
                    )));
                }

                // <f32 lat, f32 lon, u16 vbat_mv, u16 alt, u16 speed, u8 reserved, u8 integrity>
                let mut buf = &plain[..];
                let lat = buf.get_f32_le();
                let lon = buf.get_f32_le();
                let vbat_mv = buf.get_u16_le();
                let alt = buf.get_u16_le();
                let speed = buf.get_u16_le();

                Telemetry {
                    format,
                    id1,
                    id2,
                    lat: Coordinate::Float(lat),
                    lon: Coordinate::Float(lon),
                    battery: BatteryReading::Millivolts(vbat_mv),
                    altitude_m: Some(i32::from(alt)),
                    speed_mps: Some(u32::from(speed)),
                    packet_version: None,
                }
            }
            DecodedFrame::Compact24 { header, lat, lon } => Telemetry {
                format,
                id1: header.id1,
                id2: header.id2,
                lat: Coordinate::Fixed(decode24(lat)),
                lon: Coordinate::Fixed(decode24(lon)),
                battery: BatteryReading::from_packed(header.version_vbat),
                altitude_m: None,
                speed_mps: None,
                packet_version: Some(header.version()),
            },
            DecodedFrame::Compact32 { header, lat, lon } => Telemetry {
                format,
                id1: header.id1,
                id2: header.id2,
                lat: Coordinate::Fixed(decode32(lat)),
                lon: Coordinate::Fixed(decode32(lon)),
                battery: BatteryReading::from_packed(header.version_vbat),
                altitude_m: None,
                speed_mps: None,
                packet_version: Some(header.version()),
            },
            DecodedFrame::Extended24 { header, lat, lon, speed, alt } => Telemetry {
                format,
                id1: header.id1,
                id2: header.id2,
                lat: Coordinate::Fixed(decode24(lat)),
                lon: Coordinate::Fixed(decode24(lon)),
                battery: BatteryReading::from_packed(header.version_vbat),
                altitude_m: Some(i32::from(alt)),
                speed_mps: Some(u32::from(speed)),
                packet_version: Some(header.version()),
            },
            DecodedFrame::Extended32 { header, lat, lon, speed, alt } => Telemetry {
                format,
                id1: header.id1,
                id2: header.id2,
                lat: Coordinate::Fixed(decode32(lat)),
                lon: Coordinate::Fixed(decode32(lon)),
                battery: BatteryReading::from_packed(header.version_vbat),
                altitude_m: Some(i32::from(alt)),
                speed_mps: Some(u32::from(speed)),
                packet_version: Some(header.version()),
            },
            DecodedFrame::Sealed { id1, id2, version, block } => {
                self.resolve_sealed(id1, id2, version, &block)?
            }
        };

        Ok(telemetry)
    }

    /// Decrypt and authenticate a sealed block
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let plain = self.cipher.decrypt(ciphertext)?;
        if !checksum::verify(&plain) {
            warn!("Can't decrypt, possible wrong key");
            return Err(GatewayError::AuthenticationFailed);
        }
        Ok(plain)
    }

    /// Decode the inner layout of a 25-byte sealed frame
    ///
    /// The low nibble of the outer version byte selects the inner layout:
    ///
    /// ```text
    /// 2: <u8 vbat, 3B lat, 3B lon, u8 speed, u16le alt, 5B reserved, u8 integrity>
    /// 5: <u8 vbat, 4B lat, 4B lon, u8 speed, u16le alt, 3B reserved, u8 integrity>
    /// ```
    ///
    /// Any other selector yields a zeroed position and battery.
    fn resolve_sealed(
        &self,
        id1: u32,
        id2: u32,
        version: u8,
        block: &[u8; SEALED_BLOCK_LEN],
    ) -> Result<Telemetry> {
        let plain = self.open(block)?;
        let mut buf = &plain[..];
        let vbat = buf.get_u8();

        let mut telemetry = Telemetry {
            format: FrameFormat::Sealed,
            id1,
            id2,
            lat: Coordinate::Fixed(0.0),
            lon: Coordinate::Fixed(0.0),
            battery: BatteryReading::Volts(0.0),
            altitude_m: Some(0),
            speed_mps: Some(0),
            packet_version: Some(version >> 4),
        };

        let (lat, lon) = match version & 0x0F {
            SEALED_LAYOUT_COORD24 => {
                let lat = decode24(take(&mut buf));
                let lon = decode24(take(&mut buf));
                (lat, lon)
            }
            SEALED_LAYOUT_COORD32 => {
                let lat = decode32(take(&mut buf));
                let lon = decode32(take(&mut buf));
                (lat, lon)
            }
            other => {
                warn!(
                    "Sealed packet from ID2={} uses unknown inner layout {}, reporting zeros",
                    id2, other
                );
                return Ok(telemetry);
            }
        };

        telemetry.lat = Coordinate::Fixed(lat);
        telemetry.lon = Coordinate::Fixed(lon);
        telemetry.battery = BatteryReading::from_packed(vbat);
        telemetry.speed_mps = Some(u32::from(buf.get_u8()));
        telemetry.altitude_m = Some(i32::from(buf.get_u16_le()));
        Ok(telemetry)
    }
}
