//! Protocol constants for the FX-series programming port.
//!
//! All multi-byte numeric fields on the wire are ASCII-hex; these are the
//! only raw control bytes the link ever carries.

// ============================================================================
// Control Bytes
// ============================================================================

/// Enquiry - opens every exchange.
pub const ENQ: u8 = 0x05;

/// Acknowledge - handshake reply and write/bit-command reply.
pub const ACK: u8 = 0x06;

/// Start of text - opens a frame.
pub const STX: u8 = 0x02;

/// End of text - closes a frame payload, followed by 2 checksum chars.
pub const ETX: u8 = 0x03;

// ============================================================================
// Command Prefixes (Host -> Device)
// ============================================================================

/// Parameter read.
pub const PARAM_READ_PREFIX: &[u8] = b"E00";
/// Flash read.
pub const FLASH_READ_PREFIX: &[u8] = b"E01";
/// Parameter write.
pub const PARAM_WRITE_PREFIX: &[u8] = b"E10";
/// Flash write.
pub const FLASH_WRITE_PREFIX: &[u8] = b"E11";
/// Device memory read.
pub const MEMORY_READ_PREFIX: &[u8] = b"0";
/// Device memory write.
pub const MEMORY_WRITE_PREFIX: &[u8] = b"1";
/// Bit set (byte-swapped address).
pub const BIT_SET_PREFIX: &[u8] = b"E7";
/// Bit clear (byte-swapped address).
pub const BIT_CLEAR_PREFIX: &[u8] = b"E8";

// ============================================================================
// Literal Payloads
// ============================================================================

/// Lock flash after programming.
pub const FLASH_LOCK_PAYLOAD: &[u8] = b"B";

/// PLC type query. Encodes a memory read of 2 bytes at 0x0E02.
pub const TYPE_QUERY_PAYLOAD: &[u8] = b"00E0202";
pub const TYPE_QUERY_ADDRESS: u16 = 0x0E02;

/// PLC version query. Encodes a memory read of 2 bytes at 0x0ECA.
pub const VERSION_QUERY_PAYLOAD: &[u8] = b"00ECA02";
pub const VERSION_QUERY_ADDRESS: u16 = 0x0ECA;

/// Size field carried by both info queries.
pub const INFO_QUERY_SIZE: u8 = 0x02;

// ============================================================================
// Field Widths
// ============================================================================

/// Direct address field width in ASCII-hex chars.
pub const ADDRESS_CHARS: usize = 4;

/// Size field width in ASCII-hex chars.
pub const SIZE_CHARS: usize = 2;

/// One 16-bit word on the wire (low byte chars, then high byte chars).
pub const WORD_CHARS: usize = 4;

/// Largest value the 2-char size field can carry.
pub const MAX_SIZE_FIELD: usize = 0xFF;

// ============================================================================
// Link Defaults
// ============================================================================

pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Wait for the single ACK byte after ENQ or an ACK-answered command.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 1000;

/// Wait for a complete framed response.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 2000;

// ============================================================================
// Program Memory Layout
// ============================================================================

/// Program header length in words (92 bytes), read from flash address 0.
pub const PROGRAM_HEADER_WORDS: u8 = 46;

/// Flash byte address of the first program body word.
pub const PROGRAM_BODY_START: u16 = 0x805C;

/// Program body transfer chunk in bytes.
pub const PROGRAM_CHUNK_BYTES: u16 = 0x80;

/// Program body transfer chunk in words.
pub const PROGRAM_CHUNK_WORDS: u8 = (PROGRAM_CHUNK_BYTES / 2) as u8;

/// Erased program memory; a run of these terminates the body.
pub const PROGRAM_END_SENTINEL: u16 = 0xFFFF;
