//! Captured link traffic: one directional chunk per transfer.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::protocol::frame::nibble_value;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Invalid hex chunk '{text}': {reason}")]
    BadHex { text: String, reason: &'static str },

    #[error("Unknown direction label '{0}'")]
    UnknownDirection(String),
}

/// Which side sent a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "plc")]
    Device,
}

impl Direction {
    /// USB capture source label: `host` is the host, anything else the PLC.
    pub fn from_usb_src(src: &str) -> Self {
        if src == "host" {
            Direction::Host
        } else {
            Direction::Device
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Host => write!(f, "host"),
            Direction::Device => write!(f, "plc"),
        }
    }
}

impl FromStr for Direction {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" | "tx" => Ok(Direction::Host),
            "plc" | "device" | "rx" => Ok(Direction::Device),
            _ => Err(CaptureError::UnknownDirection(s.to_string())),
        }
    }
}

/// One captured transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub direction: Direction,
    pub bytes: Vec<u8>,
}

impl CaptureRecord {
    pub fn new(direction: Direction, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            direction,
            bytes: bytes.into(),
        }
    }

    /// Record from a hex string such as `02:45:37:03` or `0245370303`.
    pub fn from_hex(direction: Direction, hex: &str) -> Result<Self, CaptureError> {
        Ok(Self::new(direction, decode_hex(hex)?))
    }
}

/// Hex text to bytes. `:` and whitespace separators are ignored.
pub fn decode_hex(text: &str) -> Result<Vec<u8>, CaptureError> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| *b != b':' && !b.is_ascii_whitespace())
        .collect();
    let bad = |reason| CaptureError::BadHex {
        text: text.to_string(),
        reason,
    };
    if digits.len() % 2 != 0 {
        return Err(bad("odd number of digits"));
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            let hi = nibble_value(pair[0]).ok_or_else(|| bad("non-hex digit"))?;
            let lo = nibble_value(pair[1]).ok_or_else(|| bad("non-hex digit"))?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

/// Bytes to lowercase hex, no separators.
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::from_usb_src("host"), Direction::Host);
        assert_eq!(Direction::from_usb_src("1.3.1"), Direction::Device);
        assert_eq!("PLC".parse::<Direction>().unwrap(), Direction::Device);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(CaptureError::UnknownDirection(_))
        ));
    }

    #[test]
    fn test_decode_hex() {
        let rec = CaptureRecord::from_hex(Direction::Host, "02:45:37:03").unwrap();
        assert_eq!(rec.bytes, vec![0x02, 0x45, 0x37, 0x03]);
        assert_eq!(decode_hex("0aFF").unwrap(), vec![0x0A, 0xFF]);
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
        assert_eq!(encode_hex(&[0x02, 0xAB]), "02ab");
    }
}
