//! # Link Message Module
//!
//! Wire formats for the three message shapes exchanged between a bracelet
//! pair, and the codec that produces and parses them.
//!
//! ## Wire formats
//!
//! All messages are plain text on a fixed-size transport payload:
//! - Discovery: the raw bytes of the shared key, fixed length
//! - Acknowledgment: the literal marker `FOUND`
//! - Status report: `INFO:<STATUS>,X:<int>,Y:<int>`
//!
//! Encoding is length-checked against the transport payload limit; a record
//! that does not fit is an [`EncodeError`], never a truncated payload.
//! Decoding malformed input is a recoverable [`DecodeError`], never a panic.

use core::fmt;
use core::fmt::Write;

use crate::{LINK_PAYLOAD_SIZE, SharedKey};

/// Unicast marker that stops the peer's pairing phase.
pub(crate) const PAIRING_ACK: &[u8] = b"FOUND";

const STATUS_PREFIX: &str = "INFO:";
const X_SEPARATOR: &str = ",X:";
const Y_SEPARATOR: &str = ",Y:";

/// Transport payload buffer with a fixed-size backing array
///
/// Represents the raw bytes handed to and received from the link transport.
/// The `data` and `length` fields are intentionally public for zero-copy
/// access by link device implementations.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct LinkPayload {
    /// Raw payload bytes of fixed size
    pub data: [u8; LINK_PAYLOAD_SIZE],
    /// Actual number of valid bytes in the buffer
    pub length: usize,
}

impl LinkPayload {
    pub const fn empty() -> Self {
        LinkPayload {
            data: [0u8; LINK_PAYLOAD_SIZE],
            length: 0,
        }
    }

    /// Copies `bytes` into a fresh payload. Returns None when the input
    /// exceeds the transport payload limit.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > LINK_PAYLOAD_SIZE {
            return None;
        }
        let mut payload = LinkPayload::empty();
        payload.data[..bytes.len()].copy_from_slice(bytes);
        payload.length = bytes.len();
        Some(payload)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// The payload rendered as text for diagnostics; non-UTF-8 content is
    /// replaced with a placeholder.
    pub fn text(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("<non-text payload>")
    }
}

/// Movement status reported by the child unit
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MovementStatus {
    Standing,
    Walking,
    Running,
    Falling,
}

impl MovementStatus {
    pub fn as_token(&self) -> &'static str {
        match self {
            MovementStatus::Standing => "STANDING",
            MovementStatus::Walking => "WALKING",
            MovementStatus::Running => "RUNNING",
            MovementStatus::Falling => "FALLING",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "STANDING" => Some(MovementStatus::Standing),
            "WALKING" => Some(MovementStatus::Walking),
            "RUNNING" => Some(MovementStatus::Running),
            "FALLING" => Some(MovementStatus::Falling),
            _ => None,
        }
    }
}

impl fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Synthetic coordinates carried by a status report
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// One status report: the child's movement status plus its position
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StatusRecord {
    pub status: MovementStatus,
    pub position: Position,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EncodeError {
    /// The encoded record does not fit the transport payload limit.
    TooLong,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecodeError {
    /// The payload is not valid UTF-8.
    NotText,
    /// The payload does not start with the status-report prefix.
    MissingPrefix,
    /// The status token is not one of the four known statuses.
    UnknownStatus,
    /// An expected coordinate field delimiter is missing.
    MissingCoordinate,
    /// A coordinate field is present but not a valid integer.
    InvalidCoordinate,
}

/// Discovery broadcast: the shared key transmitted verbatim.
pub(crate) fn encode_discovery(key: &SharedKey) -> LinkPayload {
    let mut payload = LinkPayload::empty();
    let bytes = key.as_bytes();
    payload.data[..bytes.len()].copy_from_slice(bytes);
    payload.length = bytes.len();
    payload
}

/// Acknowledgment unicast sent to the bound peer to stop its pairing phase.
pub(crate) fn encode_acknowledgment() -> LinkPayload {
    let mut payload = LinkPayload::empty();
    payload.data[..PAIRING_ACK.len()].copy_from_slice(PAIRING_ACK);
    payload.length = PAIRING_ACK.len();
    payload
}

pub(crate) fn is_acknowledgment(payload: &[u8]) -> bool {
    payload == PAIRING_ACK
}

/// Length-checked writer over a payload buffer; refuses to overflow.
struct PayloadWriter<'a> {
    payload: &'a mut LinkPayload,
}

impl Write for PayloadWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.payload.length + s.len();
        if end > LINK_PAYLOAD_SIZE {
            return Err(fmt::Error);
        }
        self.payload.data[self.payload.length..end].copy_from_slice(s.as_bytes());
        self.payload.length = end;
        Ok(())
    }
}

/// Encodes a status report as `INFO:<STATUS>,X:<int>,Y:<int>`.
pub fn encode_status(record: &StatusRecord) -> Result<LinkPayload, EncodeError> {
    let mut payload = LinkPayload::empty();
    let mut writer = PayloadWriter {
        payload: &mut payload,
    };
    write!(
        writer,
        "{}{}{}{}{}{}",
        STATUS_PREFIX, record.status, X_SEPARATOR, record.position.x, Y_SEPARATOR, record.position.y
    )
    .map_err(|_| EncodeError::TooLong)?;
    Ok(payload)
}

/// Parses a status report payload. Malformed input is rejected with an
/// explicit error; the caller decides whether to log and discard.
pub fn decode_status(payload: &[u8]) -> Result<StatusRecord, DecodeError> {
    let text = core::str::from_utf8(payload).map_err(|_| DecodeError::NotText)?;
    let rest = text.strip_prefix(STATUS_PREFIX).ok_or(DecodeError::MissingPrefix)?;
    let (status_token, rest) = rest.split_once(X_SEPARATOR).ok_or(DecodeError::MissingCoordinate)?;
    let (x_token, y_token) = rest.split_once(Y_SEPARATOR).ok_or(DecodeError::MissingCoordinate)?;

    let status = MovementStatus::from_token(status_token).ok_or(DecodeError::UnknownStatus)?;
    let x = x_token.parse::<i32>().map_err(|_| DecodeError::InvalidCoordinate)?;
    let y = y_token.parse::<i32>().map_err(|_| DecodeError::InvalidCoordinate)?;

    Ok(StatusRecord {
        status,
        position: Position { x, y },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_status_report_in_wire_format() {
        let record = StatusRecord {
            status: MovementStatus::Standing,
            position: Position { x: 12345, y: 6789 },
        };
        let payload = encode_status(&record).unwrap();
        assert_eq!(payload.as_bytes(), b"INFO:STANDING,X:12345,Y:6789");
    }

    #[test]
    fn status_report_round_trips() {
        for status in [
            MovementStatus::Standing,
            MovementStatus::Walking,
            MovementStatus::Running,
            MovementStatus::Falling,
        ] {
            let record = StatusRecord {
                status,
                position: Position { x: 65535, y: 0 },
            };
            let payload = encode_status(&record).unwrap();
            assert_eq!(decode_status(payload.as_bytes()).unwrap(), record);
        }
    }

    #[test]
    fn encode_rejects_record_exceeding_payload_limit() {
        // Worst case text form is one byte over the 40-byte transport limit.
        let record = StatusRecord {
            status: MovementStatus::Standing,
            position: Position {
                x: i32::MIN,
                y: i32::MIN,
            },
        };
        assert_eq!(encode_status(&record), Err(EncodeError::TooLong));
    }

    #[test]
    fn decode_rejects_missing_prefix() {
        assert_eq!(decode_status(b"FOUND"), Err(DecodeError::MissingPrefix));
        assert_eq!(decode_status(b""), Err(DecodeError::MissingPrefix));
        assert_eq!(decode_status(b"STATUS:STANDING,X:1,Y:2"), Err(DecodeError::MissingPrefix));
    }

    #[test]
    fn decode_rejects_unknown_status() {
        assert_eq!(decode_status(b"INFO:FLYING,X:1,Y:2"), Err(DecodeError::UnknownStatus));
    }

    #[test]
    fn decode_rejects_missing_fields() {
        assert_eq!(decode_status(b"INFO:STANDING"), Err(DecodeError::MissingCoordinate));
        assert_eq!(decode_status(b"INFO:STANDING,X:7"), Err(DecodeError::MissingCoordinate));
    }

    #[test]
    fn decode_rejects_malformed_coordinates() {
        assert_eq!(decode_status(b"INFO:STANDING,X:abc,Y:2"), Err(DecodeError::InvalidCoordinate));
        assert_eq!(decode_status(b"INFO:STANDING,X:1,Y:"), Err(DecodeError::InvalidCoordinate));
        assert_eq!(decode_status(b"INFO:STANDING,X:1,Y:2,Z:3"), Err(DecodeError::InvalidCoordinate));
    }

    #[test]
    fn decode_rejects_non_text_payload() {
        assert_eq!(decode_status(&[0xFF, 0xFE, 0x00]), Err(DecodeError::NotText));
    }

    #[test]
    fn decode_accepts_negative_coordinates() {
        let record = decode_status(b"INFO:RUNNING,X:-5,Y:-12").unwrap();
        assert_eq!(record.position, Position { x: -5, y: -12 });
    }

    #[test]
    fn acknowledgment_marker_matches_only_exactly() {
        assert!(is_acknowledgment(encode_acknowledgment().as_bytes()));
        assert!(!is_acknowledgment(b"FOUND!"));
        assert!(!is_acknowledgment(b"FOUN"));
    }

    #[test]
    fn discovery_carries_the_key_verbatim() {
        let key = SharedKey::from_bytes(b"WG-K1");
        let payload = encode_discovery(&key);
        assert_eq!(payload.as_bytes(), key.as_bytes());
    }

    #[test]
    fn payload_from_bytes_rejects_oversized_input() {
        let oversized = [b'A'; LINK_PAYLOAD_SIZE + 1];
        assert!(LinkPayload::from_bytes(&oversized).is_none());
        let exact = [b'A'; LINK_PAYLOAD_SIZE];
        assert_eq!(LinkPayload::from_bytes(&exact).unwrap().as_bytes(), &exact);
    }
}
