//! Flower Light Wire Protocol
//!
//! Framing, payload shapes and characteristic identifiers for the flower
//! lamp's command channel.
//!
//! # Command Packet Structure (big-endian, at most 261 bytes)
//!
//! ```text
//! [0-1]   : Command type (u16)
//! [2-3]   : Message id (u16, per-device sequence counter)
//! [4-5]   : Payload length N (u16, N <= 255)
//! [6..]   : Payload (MessagePack map, N bytes)
//! ```
//!
//! There is no checksum. GATT write acknowledgment is the only integrity signal.

use rmpv::Value;
use serde::Serialize;
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

/// Command write characteristic
pub const COMMAND_CHAR: Uuid = Uuid::from_u128(0x03c6eedc_22b5_4a0e_9110_2cd0131cd528);
/// State notification characteristic
pub const STATE_CHAR: Uuid = Uuid::from_u128(0xac292c4b_8bd0_439b_9260_2d9526fff89a);

// Configuration service
pub const NAME_CHAR: Uuid = Uuid::from_u128(0xab130585_2b27_498e_a5a5_019391317350);
pub const SPEED_CHAR: Uuid = Uuid::from_u128(0xa54d8bbb_379b_425e_8d6e_84d0b20309aa);
pub const BRIGHTNESS_CHAR: Uuid = Uuid::from_u128(0x2be47e11_088c_47aa_ae77_e2453d840833);
pub const MAX_OPEN_CHAR: Uuid = Uuid::from_u128(0x86bbd86c_6056_446e_a63b_ebb313bb65a5);
/// Packed hue/saturation pairs, see [`decode_color_scheme`]
pub const COLOR_SCHEME_CHAR: Uuid = Uuid::from_u128(0x10b8879e_0ea0_4fe2_9055_a244a1eaca8b);
pub const WIFI_STATUS_CHAR: Uuid = Uuid::from_u128(0xbf970815_44d5_416b_a737_0bf74195d4b5);

// Standard battery and device information characteristics
pub const BATTERY_LEVEL_CHAR: Uuid = short_uuid(0x2a19);
pub const BATTERY_POWER_STATE_CHAR: Uuid = short_uuid(0x2a1a);
pub const MODEL_CHAR: Uuid = short_uuid(0x2a24);
pub const SERIAL_CHAR: Uuid = short_uuid(0x2a25);
pub const FIRMWARE_CHAR: Uuid = short_uuid(0x2a26);
pub const HARDWARE_CHAR: Uuid = short_uuid(0x2a27);
pub const MANUFACTURER_CHAR: Uuid = short_uuid(0x2a29);

pub const HEADER_LEN: usize = 6;
/// Hard ceiling imposed by the firmware's receive buffer
pub const MAX_PAYLOAD_LEN: usize = 255;
pub const MAX_PACKET_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// Power-state byte reported while the lamp sits on its charger
pub const CHARGING_POWER_STATE: u8 = 0b0011_1011;
/// Colours the firmware keeps in its scheme slot
pub const MAX_COLOR_SCHEME_LEN: usize = 10;

/// Bluetooth SIG base UUID, used to expand 16-bit short identifiers
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit SIG identifier onto the base UUID
pub const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("command payload too large: {size} bytes (max 255)")]
    PayloadTooLarge { size: usize },
    #[error("failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode payload: {0}")]
    Decode(String),
    #[error("packet too short: {0} bytes")]
    Truncated(usize),
    #[error("payload length field says {declared} bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

/// Payload for the write-state command (colour, petals and transition at once)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatePayload {
    #[serde(rename = "l")]
    pub petals: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(rename = "t")]
    pub transition_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorPayload {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(rename = "t")]
    pub transition_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PetalsPayload {
    #[serde(rename = "l")]
    pub petals: u8,
    #[serde(rename = "t")]
    pub transition_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnimationPayload {
    #[serde(rename = "a")]
    pub animation: u8,
}

/// Device-side configuration; absent fields are left untouched by the firmware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CustomizationPayload {
    #[serde(rename = "spd", skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(rename = "brg", skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(rename = "mol", skip_serializing_if = "Option::is_none")]
    pub max_open: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamePayload {
    #[serde(rename = "n")]
    pub name: String,
}

/// Colour scheme entries, written as a MessagePack array of packed hue/saturation words
pub type ColorSchemePayload = Vec<u16>;

/// Encodes as an empty map, which the firmware treats as a remote-control takeover
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmptyPayload {}

/// Serialize a payload as a MessagePack map and enforce the size ceiling
pub fn encode_payload<P: Serialize + ?Sized>(payload: &P) -> Result<Vec<u8>, ProtocolError> {
    let bytes = rmp_serde::to_vec_named(payload)?;
    if bytes.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge { size: bytes.len() });
    }
    Ok(bytes)
}

/// Encode a complete packet ready for the command characteristic
pub fn encode<P: Serialize + ?Sized>(
    command_type: u16,
    message_id: u16,
    payload: &P,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(payload)?;
    Ok(CommandPacket::new(command_type, message_id, payload).to_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub command_type: u16,
    pub message_id: u16,
    pub payload: Vec<u8>,
}

impl CommandPacket {
    /// `payload` must already be size-checked by [`encode_payload`]
    pub fn new(command_type: u16, message_id: u16, payload: Vec<u8>) -> Self {
        Self {
            command_type,
            message_id,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.command_type.to_be_bytes());
        bytes.extend_from_slice(&self.message_id.to_be_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Validate framing of an encoded packet
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated(bytes.len()));
        }

        let command_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let message_id = u16::from_be_bytes([bytes[2], bytes[3]]);
        let declared = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        let payload = &bytes[HEADER_LEN..];

        if declared > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge { size: declared });
        }
        if declared != payload.len() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Ok(Self::new(command_type, message_id, payload.to_vec()))
    }

    /// Decode the payload map into `(key, value)` pairs in wire order
    pub fn fields(&self) -> Result<Vec<(String, Value)>, ProtocolError> {
        decode_map(&self.payload)
    }
}

/// Result of the forward-compatible notification decode hook
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The bytes formed a complete MessagePack map with string keys
    Fields(Vec<(String, Value)>),
    /// Anything else; treated purely as a "state may have changed" trigger
    Opaque(Vec<u8>),
}

/// Interpret inbound notification bytes. Never fails.
pub fn decode_notification(bytes: &[u8]) -> Notification {
    match decode_map(bytes) {
        Ok(fields) => Notification::Fields(fields),
        Err(e) => {
            trace!("Notification is not a map payload: {}", e);
            Notification::Opaque(bytes.to_vec())
        }
    }
}

fn decode_map(bytes: &[u8]) -> Result<Vec<(String, Value)>, ProtocolError> {
    let mut cursor = bytes;
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| ProtocolError::Decode(e.to_string()))?;
    if !cursor.is_empty() {
        return Err(ProtocolError::Decode(format!(
            "{} trailing bytes",
            cursor.len()
        )));
    }

    let Value::Map(entries) = value else {
        return Err(ProtocolError::Decode("payload is not a map".to_string()));
    };

    entries
        .into_iter()
        .map(|(key, value)| match key {
            Value::String(key) => key
                .into_str()
                .map(|key| (key, value))
                .ok_or_else(|| ProtocolError::Decode("key is not valid UTF-8".to_string())),
            other => Err(ProtocolError::Decode(format!("non-string key {}", other))),
        })
        .collect()
}

/// Pack a colour into the 16-bit scheme word: 9 bits of hue in degrees, 7 bits
/// of saturation in percent. Value (brightness) is discarded.
pub fn encode_hue_saturation(r: u8, g: u8, b: u8) -> u16 {
    let (rn, gn, bn) = (r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
    let max = rn.max(gn).max(bn);
    let min = rn.min(gn).min(bn);
    let delta = max - min;

    let mut hue = 0.0;
    if delta != 0.0 {
        let sector = if max == rn {
            ((gn - bn) / delta) % 6.0
        } else if max == gn {
            (bn - rn) / delta + 2.0
        } else {
            (rn - gn) / delta + 4.0
        };
        hue = sector / 6.0;
        if hue < 0.0 {
            hue += 1.0;
        }
    }
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    let h = ((hue * 360.0).floor() as i64).clamp(0, 511) as u16;
    let s = ((saturation * 100.0).floor() as i64).clamp(0, 127) as u16;
    (h << 7) | (s & 0x7f)
}

/// Expand a scheme word back to a full-brightness colour
pub fn decode_hue_saturation(word: u16) -> (u8, u8, u8) {
    let hue = ((word >> 7) & 0x1ff) as f64 / 360.0;
    let saturation = ((word & 0x7f) as f64 / 100.0).min(1.0);

    let sector = (hue * 6.0).floor();
    let f = hue * 6.0 - sector;
    let p = 1.0 - saturation;
    let q = 1.0 - f * saturation;
    let t = 1.0 - (1.0 - f) * saturation;

    let (r, g, b) = match (sector as i64).rem_euclid(6) {
        0 => (1.0, t, p),
        1 => (q, 1.0, p),
        2 => (p, 1.0, t),
        3 => (p, q, 1.0),
        4 => (t, p, 1.0),
        _ => (1.0, p, q),
    };
    let channel = |v: f64| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    (channel(r), channel(g), channel(b))
}

/// Read big-endian scheme words; an odd trailing byte is ignored
pub fn decode_color_scheme(bytes: &[u8]) -> Vec<(u8, u8, u8)> {
    bytes
        .chunks_exact(2)
        .map(|pair| decode_hue_saturation(u16::from_be_bytes([pair[0], pair[1]])))
        .collect()
}

/// Parse a characteristic identifier: a full UUID or a 16-bit SIG short form
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, ProtocolError> {
    let trimmed = uuid_str.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if trimmed.len() == 4 {
        let short = u16::from_str_radix(trimmed, 16)
            .map_err(|_| ProtocolError::InvalidUuid(uuid_str.to_string()))?;
        return Ok(short_uuid(short));
    }

    Uuid::parse_str(trimmed).map_err(|_| ProtocolError::InvalidUuid(uuid_str.to_string()))
}

/// Lowercase hex dump for packet logging
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: u64) -> Value {
        Value::from(value)
    }

    #[test]
    fn test_encode_then_parse() {
        let payload = StatePayload {
            petals: 50,
            r: 255,
            g: 128,
            b: 0,
            transition_ms: 1000,
        };
        let bytes = encode(67, 0x1234, &payload).unwrap();

        assert_eq!(&bytes[0..2], &[0x00, 0x43]);
        assert_eq!(&bytes[2..4], &[0x12, 0x34]);
        assert_eq!(
            u16::from_be_bytes([bytes[4], bytes[5]]) as usize,
            bytes.len() - HEADER_LEN
        );

        let packet = CommandPacket::parse(&bytes).unwrap();
        assert_eq!(packet.command_type, 67);
        assert_eq!(packet.message_id, 0x1234);
        assert_eq!(
            packet.fields().unwrap(),
            vec![
                ("l".to_string(), int(50)),
                ("r".to_string(), int(255)),
                ("g".to_string(), int(128)),
                ("b".to_string(), int(0)),
                ("t".to_string(), int(1000)),
            ]
        );
    }

    #[test]
    fn test_compact_map_encoding() {
        // fixmap(2) "l" 100 "t" uint16(1000)
        let bytes = encode_payload(&PetalsPayload {
            petals: 100,
            transition_ms: 1000,
        })
        .unwrap();
        assert_eq!(
            bytes,
            vec![0x82, 0xa1, b'l', 0x64, 0xa1, b't', 0xcd, 0x03, 0xe8]
        );
    }

    #[test]
    fn test_empty_payload_is_empty_map() {
        let bytes = encode(67, 1, &EmptyPayload {}).unwrap();
        assert_eq!(bytes, vec![0x00, 0x43, 0x00, 0x01, 0x00, 0x01, 0x80]);
    }

    #[test]
    fn test_customization_skips_absent_fields() {
        let payload = CustomizationPayload {
            brightness: Some(40),
            ..Default::default()
        };
        let fields = decode_map(&encode_payload(&payload).unwrap()).unwrap();
        assert_eq!(fields, vec![("brg".to_string(), int(40))]);
    }

    #[test]
    fn test_payload_too_large() {
        let payload = NamePayload {
            name: "x".repeat(300),
        };
        match encode(74, 1, &payload) {
            Err(ProtocolError::PayloadTooLarge { size }) => assert!(size > MAX_PAYLOAD_LEN),
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_size_boundary() {
        // fixmap(1) + fixstr "n" + str8 header (2) = 5 bytes of overhead
        let fits = NamePayload {
            name: "y".repeat(MAX_PAYLOAD_LEN - 5),
        };
        let bytes = encode(74, 1, &fits).unwrap();
        assert_eq!(bytes.len(), MAX_PACKET_LEN);

        let too_big = NamePayload {
            name: "y".repeat(MAX_PAYLOAD_LEN - 4),
        };
        assert!(matches!(
            encode_payload(&too_big),
            Err(ProtocolError::PayloadTooLarge { size: 256 })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_framing() {
        assert!(matches!(
            CommandPacket::parse(&[0x00, 0x43, 0x00]),
            Err(ProtocolError::Truncated(3))
        ));
        assert!(matches!(
            CommandPacket::parse(&[0x00, 0x43, 0x00, 0x01, 0x00, 0x05, 0x80]),
            Err(ProtocolError::LengthMismatch {
                declared: 5,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_decode_notification() {
        let map = encode_payload(&AnimationPayload { animation: 3 }).unwrap();
        assert_eq!(
            decode_notification(&map),
            Notification::Fields(vec![("a".to_string(), int(3))])
        );

        // Raw state bytes (petals, r, g, b) are not a map
        let raw = [0x32, 0xff, 0x00, 0x10];
        assert_eq!(decode_notification(&raw), Notification::Opaque(raw.to_vec()));
        assert_eq!(decode_notification(&[]), Notification::Opaque(Vec::new()));
    }

    #[test]
    fn test_parse_uuid() {
        let full = parse_uuid("03c6eedc-22b5-4a0e-9110-2cd0131cd528").unwrap();
        assert_eq!(full, COMMAND_CHAR);
        assert_eq!(parse_uuid(&COMMAND_CHAR.to_string()).unwrap(), COMMAND_CHAR);

        let battery = parse_uuid("2a19").unwrap();
        assert_eq!(battery, BATTERY_LEVEL_CHAR);
        assert_eq!(battery.to_string(), "00002a19-0000-1000-8000-00805f9b34fb");
        assert_eq!(parse_uuid("0x2A19").unwrap(), battery);
        assert_eq!(parse_uuid("0X2A19").unwrap(), battery);
        assert_eq!(parse_uuid(" 0X2a19 ").unwrap(), battery);

        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_hue_saturation_words() {
        assert_eq!(encode_hue_saturation(255, 0, 0), 100);
        assert_eq!(encode_hue_saturation(255, 255, 255), 0);
        assert_eq!(encode_hue_saturation(0, 0, 0), 0);
        // brightness is not part of the word
        assert_eq!(encode_hue_saturation(128, 0, 0), 100);
        assert_eq!(encode_hue_saturation(255, 128, 128), 49);

        assert_eq!(decode_hue_saturation(100), (255, 0, 0));
        assert_eq!(decode_hue_saturation(49), (255, 130, 130));
        assert_eq!(decode_hue_saturation(0), (255, 255, 255));
    }

    #[test]
    fn test_hue_saturation_out_of_range_word() {
        // 511 degrees wraps past 360; 127% saturation clamps to 100%
        assert_eq!(decode_hue_saturation(u16::MAX), (0, 255, 132));
    }

    #[test]
    fn test_decode_color_scheme() {
        assert_eq!(
            decode_color_scheme(&[0x00, 0x64, 0x00, 0x00, 0x7f]),
            vec![(255, 0, 0), (255, 255, 255)]
        );
        assert!(decode_color_scheme(&[]).is_empty());
    }

    #[test]
    fn test_color_scheme_payload_is_array() {
        let payload: ColorSchemePayload = vec![100, 0];
        // fixarray(2) 100 0
        assert_eq!(encode_payload(&payload).unwrap(), vec![0x92, 0x64, 0x00]);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x00, 0x43, 0xab]), "0043ab");
    }
}
