//! Command payload encoding and response/request decoding.
//!
//! Field conventions (all ASCII-hex):
//! - block reads/writes: prefix, 4-char address (direct), 2-char size
//!   (word count on reads, byte count on writes), then 4 chars per word
//!   with the low byte's chars first
//! - bit set/clear: prefix, then low byte chars, then high byte chars
//! - flash lock and the info queries are literal payloads

use thiserror::Error;

use super::constants::*;
use super::frame::{hex_chars, parse_hex};
use super::kind::MessageKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid hex digits '{text}' at offset {offset}")]
    InvalidHex { offset: usize, text: String },
    #[error("Write of {words} words does not fit the size field (max {max} bytes)")]
    WriteTooLarge { words: usize, max: usize },
    #[error("Write with no values")]
    EmptyWrite,
    #[error("Response too short: expected {expected} words, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
}

/// One host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MemoryRead { address: u16, words: u8 },
    MemoryWrite { address: u16, values: Vec<u16> },
    ParamRead { address: u16, words: u8 },
    ParamWrite { address: u16, values: Vec<u16> },
    FlashRead { address: u16, words: u8 },
    FlashWrite { address: u16, values: Vec<u16> },
    BitSet { address: u16 },
    BitClear { address: u16 },
    FlashLock,
    TypeQuery,
    VersionQuery,
}

impl Command {
    pub fn kind(&self) -> MessageKind {
        match self {
            Command::MemoryRead { .. } => MessageKind::MemoryRead,
            Command::MemoryWrite { .. } => MessageKind::MemoryWrite,
            Command::ParamRead { .. } => MessageKind::ParamRead,
            Command::ParamWrite { .. } => MessageKind::ParamWrite,
            Command::FlashRead { .. } => MessageKind::FlashRead,
            Command::FlashWrite { .. } => MessageKind::FlashWrite,
            Command::BitSet { .. } => MessageKind::BitSet,
            Command::BitClear { .. } => MessageKind::BitClear,
            Command::FlashLock => MessageKind::FlashLock,
            Command::TypeQuery => MessageKind::TypeQuery,
            Command::VersionQuery => MessageKind::VersionQuery,
        }
    }

    /// Encode the payload that goes between STX and ETX.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Command::MemoryRead { address, words } => {
                Ok(encode_read(MEMORY_READ_PREFIX, *address, *words))
            }
            Command::MemoryWrite { address, values } => {
                encode_write(MEMORY_WRITE_PREFIX, *address, values)
            }
            Command::ParamRead { address, words } => {
                Ok(encode_read(PARAM_READ_PREFIX, *address, *words))
            }
            Command::ParamWrite { address, values } => {
                encode_write(PARAM_WRITE_PREFIX, *address, values)
            }
            Command::FlashRead { address, words } => {
                Ok(encode_read(FLASH_READ_PREFIX, *address, *words))
            }
            Command::FlashWrite { address, values } => {
                encode_write(FLASH_WRITE_PREFIX, *address, values)
            }
            Command::BitSet { address } => Ok(encode_bit(BIT_SET_PREFIX, *address)),
            Command::BitClear { address } => Ok(encode_bit(BIT_CLEAR_PREFIX, *address)),
            Command::FlashLock => Ok(FLASH_LOCK_PAYLOAD.to_vec()),
            Command::TypeQuery => Ok(TYPE_QUERY_PAYLOAD.to_vec()),
            Command::VersionQuery => Ok(VERSION_QUERY_PAYLOAD.to_vec()),
        }
    }

    /// Number of words a read expects back, `None` for ACK-answered commands.
    pub fn expected_words(&self) -> Option<usize> {
        match self {
            Command::MemoryRead { words, .. }
            | Command::ParamRead { words, .. }
            | Command::FlashRead { words, .. } => Some(*words as usize),
            Command::TypeQuery | Command::VersionQuery => Some(1),
            _ => None,
        }
    }
}

/// `prefix ++ address(4) ++ words(2)`.
pub fn encode_read(prefix: &[u8], address: u16, words: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(prefix.len() + ADDRESS_CHARS + SIZE_CHARS);
    payload.extend_from_slice(prefix);
    payload.extend(hex_chars(address, ADDRESS_CHARS));
    payload.extend(hex_chars(words as u16, SIZE_CHARS));
    payload
}

/// `prefix ++ address(4) ++ bytes(2) ++ words(4 each)`.
pub fn encode_write(prefix: &[u8], address: u16, values: &[u16]) -> Result<Vec<u8>, CodecError> {
    if values.is_empty() {
        return Err(CodecError::EmptyWrite);
    }
    let byte_count = values.len() * 2;
    if byte_count > MAX_SIZE_FIELD {
        return Err(CodecError::WriteTooLarge {
            words: values.len(),
            max: MAX_SIZE_FIELD,
        });
    }
    let mut payload = Vec::with_capacity(
        prefix.len() + ADDRESS_CHARS + SIZE_CHARS + values.len() * WORD_CHARS,
    );
    payload.extend_from_slice(prefix);
    payload.extend(hex_chars(address, ADDRESS_CHARS));
    payload.extend(hex_chars(byte_count as u16, SIZE_CHARS));
    payload.extend(encode_words(values));
    Ok(payload)
}

/// `prefix ++ low_byte(2) ++ high_byte(2)`.
pub fn encode_bit(prefix: &[u8], address: u16) -> Vec<u8> {
    let [low, high] = address.to_le_bytes();
    let mut payload = Vec::with_capacity(prefix.len() + 4);
    payload.extend_from_slice(prefix);
    payload.extend(hex_chars(low as u16, 2));
    payload.extend(hex_chars(high as u16, 2));
    payload
}

/// Each word as low byte chars then high byte chars.
pub fn encode_words(values: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * WORD_CHARS);
    for &value in values {
        let [low, high] = value.to_le_bytes();
        out.extend(hex_chars(low as u16, 2));
        out.extend(hex_chars(high as u16, 2));
    }
    out
}

fn decode_word(group: &[u8]) -> Option<u16> {
    let low = parse_hex(&group[0..2])?;
    let high = parse_hex(&group[2..4])?;
    Some((high << 8) | low)
}

/// Decode a word-valued read response. A trailing partial group is ignored.
pub fn decode_words(payload: &[u8]) -> Result<Vec<u16>, CodecError> {
    payload
        .chunks_exact(WORD_CHARS)
        .enumerate()
        .map(|(i, group)| {
            decode_word(group).ok_or_else(|| CodecError::InvalidHex {
                offset: i * WORD_CHARS,
                text: String::from_utf8_lossy(group).into_owned(),
            })
        })
        .collect()
}

/// Like [`decode_words`], but groups that are not valid hex are skipped.
pub fn decode_words_lossy(payload: &[u8]) -> Vec<u16> {
    payload
        .chunks_exact(WORD_CHARS)
        .filter_map(decode_word)
        .collect()
}

/// Fields recovered from a host request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFields {
    pub kind: MessageKind,
    pub address: Option<u16>,
    pub size: Option<u8>,
    pub values: Vec<u16>,
}

impl RequestFields {
    fn bare(kind: MessageKind) -> Self {
        Self {
            kind,
            address: None,
            size: None,
            values: Vec::new(),
        }
    }
}

/// Classify a request payload by its prefix and pull out its fields.
///
/// Literal payloads are matched before the single-char `0`/`1` prefixes,
/// since the info queries themselves start with `0`.
pub fn decode_request(payload: &[u8]) -> RequestFields {
    if payload == TYPE_QUERY_PAYLOAD {
        return decode_block(MessageKind::TypeQuery, payload, MEMORY_READ_PREFIX.len());
    }
    if payload == VERSION_QUERY_PAYLOAD {
        return decode_block(MessageKind::VersionQuery, payload, MEMORY_READ_PREFIX.len());
    }
    if payload == FLASH_LOCK_PAYLOAD {
        return RequestFields::bare(MessageKind::FlashLock);
    }

    let block_prefixes: [(&[u8], MessageKind); 4] = [
        (PARAM_READ_PREFIX, MessageKind::ParamRead),
        (FLASH_READ_PREFIX, MessageKind::FlashRead),
        (PARAM_WRITE_PREFIX, MessageKind::ParamWrite),
        (FLASH_WRITE_PREFIX, MessageKind::FlashWrite),
    ];
    for (prefix, kind) in block_prefixes {
        if payload.starts_with(prefix) {
            return decode_block(kind, payload, prefix.len());
        }
    }

    // Shorter bit payloads fall through to unknown.
    if payload.len() >= 5 {
        if payload.starts_with(BIT_SET_PREFIX) {
            return decode_bit(MessageKind::BitSet, payload);
        }
        if payload.starts_with(BIT_CLEAR_PREFIX) {
            return decode_bit(MessageKind::BitClear, payload);
        }
    }

    if payload.starts_with(MEMORY_READ_PREFIX) {
        return decode_block(MessageKind::MemoryRead, payload, MEMORY_READ_PREFIX.len());
    }
    if payload.starts_with(MEMORY_WRITE_PREFIX) {
        return decode_block(MessageKind::MemoryWrite, payload, MEMORY_WRITE_PREFIX.len());
    }

    RequestFields::bare(MessageKind::unknown_from_text(&String::from_utf8_lossy(payload)))
}

fn decode_block(kind: MessageKind, payload: &[u8], header: usize) -> RequestFields {
    let mut fields = RequestFields::bare(kind);
    let size_start = header + ADDRESS_CHARS;
    let data_start = size_start + SIZE_CHARS;
    if payload.len() < data_start {
        return fields;
    }
    fields.address = parse_hex(&payload[header..size_start]);
    fields.size = parse_hex(&payload[size_start..data_start]).map(|s| s as u8);
    fields.values = decode_words_lossy(&payload[data_start..]);
    fields
}

/// Non-hex address digits make the payload an unknown message.
fn decode_bit(kind: MessageKind, payload: &[u8]) -> RequestFields {
    let low = parse_hex(&payload[2..4]);
    let high = if payload.len() >= 6 {
        parse_hex(&payload[4..6])
    } else {
        Some(0)
    };
    match (low, high) {
        (Some(low), Some(high)) => {
            let mut fields = RequestFields::bare(kind);
            fields.address = Some((high << 8) | low);
            fields
        }
        _ => RequestFields::bare(MessageKind::unknown_from_text(&String::from_utf8_lossy(payload))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_param_read_encoding() {
        let cmd = Command::ParamRead {
            address: 0x0000,
            words: 2,
        };
        assert_eq!(cmd.encode().unwrap(), b"E00000002");
    }

    #[test]
    fn test_bit_set_address_is_byte_swapped() {
        let cmd = Command::BitSet { address: 0x1234 };
        assert_eq!(cmd.encode().unwrap(), b"E73412");
        let cmd = Command::BitClear { address: 0x0560 };
        assert_eq!(cmd.encode().unwrap(), b"E86005");
    }

    #[test]
    fn test_write_size_is_byte_count() {
        let cmd = Command::FlashWrite {
            address: 0x805C,
            values: vec![0x1234, 0x00FF],
        };
        assert_eq!(cmd.encode().unwrap(), b"E11805C043412FF00");

        let cmd = Command::MemoryWrite {
            address: 0x1000,
            values: vec![0xABCD],
        };
        assert_eq!(cmd.encode().unwrap(), b"1100002CDAB");
    }

    #[test]
    fn test_memory_read_encoding() {
        let cmd = Command::MemoryRead {
            address: 0x0E02,
            words: 2,
        };
        assert_eq!(cmd.encode().unwrap(), TYPE_QUERY_PAYLOAD);
    }

    #[test]
    fn test_literal_payloads() {
        assert_eq!(Command::FlashLock.encode().unwrap(), b"B");
        assert_eq!(Command::TypeQuery.encode().unwrap(), b"00E0202");
        assert_eq!(Command::VersionQuery.encode().unwrap(), b"00ECA02");
    }

    #[test]
    fn test_write_limits() {
        let cmd = Command::ParamWrite {
            address: 0,
            values: vec![],
        };
        assert_eq!(cmd.encode(), Err(CodecError::EmptyWrite));

        let cmd = Command::ParamWrite {
            address: 0,
            values: vec![0; 128],
        };
        assert!(matches!(
            cmd.encode(),
            Err(CodecError::WriteTooLarge { words: 128, .. })
        ));

        let cmd = Command::ParamWrite {
            address: 0,
            values: vec![0; 127],
        };
        assert!(cmd.encode().is_ok());
    }

    #[test]
    fn test_decode_words_swaps_bytes() {
        assert_eq!(decode_words(b"3412CDAB").unwrap(), vec![0x1234, 0xABCD]);
        assert_eq!(decode_words(b"341").unwrap(), Vec::<u16>::new());
        assert!(matches!(
            decode_words(b"3412ZZ00"),
            Err(CodecError::InvalidHex { offset: 4, .. })
        ));
        assert_eq!(decode_words_lossy(b"ZZ003412"), vec![0x1234]);
    }

    #[test]
    fn test_decode_request_block() {
        let fields = decode_request(b"E01805C043412FF00");
        assert_eq!(fields.kind, MessageKind::FlashRead);
        assert_eq!(fields.address, Some(0x805C));
        assert_eq!(fields.size, Some(4));
        assert_eq!(fields.values, vec![0x1234, 0x00FF]);

        let fields = decode_request(b"E10");
        assert_eq!(fields.kind, MessageKind::ParamWrite);
        assert_eq!(fields.address, None);
    }

    #[test]
    fn test_decode_request_literals_before_memory() {
        let fields = decode_request(b"00E0202");
        assert_eq!(fields.kind, MessageKind::TypeQuery);
        assert_eq!(fields.address, Some(TYPE_QUERY_ADDRESS));
        assert_eq!(fields.size, Some(2));

        assert_eq!(decode_request(b"00ECA02").kind, MessageKind::VersionQuery);
        assert_eq!(decode_request(b"B").kind, MessageKind::FlashLock);
        assert_eq!(decode_request(b"0100004").kind, MessageKind::MemoryRead);
        assert_eq!(decode_request(b"1100002CDAB").values, vec![0xABCD]);
    }

    #[test]
    fn test_decode_request_bits() {
        let fields = decode_request(b"E73412");
        assert_eq!(fields.kind, MessageKind::BitSet);
        assert_eq!(fields.address, Some(0x1234));

        let fields = decode_request(b"E8605");
        assert_eq!(fields.kind, MessageKind::BitClear);
        assert_eq!(fields.address, Some(0x0060));

        assert_eq!(decode_request(b"E73").kind.tag(), "U_E7");
    }

    #[test]
    fn test_decode_request_bad_bit_address() {
        let fields = decode_request(b"E7ZZ12");
        assert_eq!(fields.kind.tag(), "U_E7");
        assert_eq!(fields.address, None);
        assert_eq!(decode_request(b"E805G1").kind.tag(), "U_E8");
    }

    #[test]
    fn test_decode_request_unknown() {
        assert_eq!(decode_request(b"QX99").kind.tag(), "U_QX");
        assert_eq!(decode_request(b"").kind.tag(), "U_00");
    }

    proptest! {
        #[test]
        fn word_encoding_round_trip(value in any::<u16>()) {
            prop_assert_eq!(decode_words(&encode_words(&[value])).unwrap(), vec![value]);
        }
    }
}
