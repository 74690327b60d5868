//! Frame primitives: ASCII-hex helpers, checksum, frame build/parse.
//!
//! Wire form: `STX ++ payload ++ ETX ++ checksum`, where the checksum is the
//! low byte of the sum of `payload ++ [ETX]` as two uppercase hex chars.

use std::fmt;

use thiserror::Error;

use super::constants::{ETX, STX};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Missing STX: first byte is {}", fmt_first(.found))]
    MissingStx { found: Option<u8> },
    #[error("Missing ETX in {len}-byte frame")]
    MissingEtx { len: usize },
}

fn fmt_first(found: &Option<u8>) -> String {
    match found {
        Some(b) => format!("0x{:02X}", b),
        None => "absent".to_string(),
    }
}

/// ASCII char for a nibble, `'0'..'9'` then `'A'..'F'`.
#[inline]
pub const fn hex_nibble(n: u8) -> u8 {
    let n = n & 0x0F;
    if n < 10 { b'0' + n } else { b'A' + n - 10 }
}

/// Value of one ASCII-hex char (either case).
#[inline]
pub const fn nibble_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Render `value` as `width` uppercase ASCII-hex chars, most significant first.
pub fn hex_chars(value: u16, width: usize) -> Vec<u8> {
    (0..width)
        .rev()
        .map(|i| {
            let shift = i * 4;
            let nibble = if shift < 16 { (value >> shift) & 0x0F } else { 0 };
            hex_nibble(nibble as u8)
        })
        .collect()
}

/// Parse ASCII-hex chars into a number. Empty input and more than 4 chars
/// are rejected.
pub fn parse_hex(chars: &[u8]) -> Option<u16> {
    if chars.is_empty() || chars.len() > 4 {
        return None;
    }
    chars
        .iter()
        .try_fold(0u16, |acc, &c| Some((acc << 4) | nibble_value(c)? as u16))
}

/// Checksum over `data`, which must already include the trailing ETX.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    [hex_nibble(sum >> 4), hex_nibble(sum)]
}

/// Checksum over `payload ++ [ETX]`.
pub fn payload_checksum(payload: &[u8]) -> [u8; 2] {
    let sum = payload
        .iter()
        .fold(ETX, |acc, &b| acc.wrapping_add(b));
    [hex_nibble(sum >> 4), hex_nibble(sum)]
}

/// A framed payload with the checksum it carries (or will carry).
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
    checksum: Vec<u8>,
}

impl Frame {
    /// New outgoing frame; the checksum is computed.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        let checksum = payload_checksum(&payload).to_vec();
        Self { payload, checksum }
    }

    /// Parse received bytes. The payload is everything strictly between the
    /// leading STX and the first ETX; the checksum is up to 2 bytes after it.
    pub fn parse(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.first() != Some(&STX) {
            return Err(FramingError::MissingStx {
                found: bytes.first().copied(),
            });
        }
        let etx_pos = bytes
            .iter()
            .skip(1)
            .position(|&b| b == ETX)
            .map(|p| p + 1)
            .ok_or(FramingError::MissingEtx { len: bytes.len() })?;

        let checksum_end = (etx_pos + 3).min(bytes.len());
        Ok(Self {
            payload: bytes[1..etx_pos].to_vec(),
            checksum: bytes[etx_pos + 1..checksum_end].to_vec(),
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Checksum chars as carried by the frame.
    pub fn checksum(&self) -> &[u8] {
        &self.checksum
    }

    /// Checksum the payload should carry.
    pub fn expected_checksum(&self) -> [u8; 2] {
        payload_checksum(&self.payload)
    }

    pub fn is_valid(&self) -> bool {
        self.checksum == self.expected_checksum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 4);
        buf.push(STX);
        buf.extend_from_slice(&self.payload);
        buf.push(ETX);
        buf.extend_from_slice(&self.checksum);
        buf
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame('{}' sum '{}')",
            String::from_utf8_lossy(&self.payload),
            String::from_utf8_lossy(&self.checksum)
        )
    }
}

/// `[STX] ++ payload ++ [ETX] ++ checksum(payload ++ [ETX])`.
pub fn build_frame(payload: &[u8]) -> Vec<u8> {
    Frame::new(payload).to_bytes()
}

/// Split a received frame into its payload and whether the checksum matched.
pub fn parse_frame(bytes: &[u8]) -> Result<(Vec<u8>, bool), FramingError> {
    let frame = Frame::parse(bytes)?;
    let valid = frame.is_valid();
    Ok((frame.into_payload(), valid))
}

/// Space-separated `0xNN` rendering used in logs.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
