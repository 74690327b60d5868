//! Program memory: the 46-word header and the instruction body in flash.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::events::{PlcEvent, PlcObserver};
use crate::protocol::constants::{
    PROGRAM_BODY_START, PROGRAM_CHUNK_BYTES, PROGRAM_CHUNK_WORDS, PROGRAM_END_SENTINEL,
    PROGRAM_HEADER_WORDS,
};
use crate::session::{AckStatus, PlcSession, SessionError};
use crate::transport::SerialTransport;

#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("Program header needs {expected} words, got {actual}")]
    ShortHeader { expected: usize, actual: usize },

    #[error("Invalid program word '{0}'")]
    BadWord(String),

    #[error("Binary program has an odd number of bytes ({0})")]
    OddByteCount(usize),

    #[error("Flash write at 0x{address:04X} failed: {status}")]
    WriteRejected { address: u16, status: AckStatus },

    #[error("Program does not fit in flash from 0x{start:04X} ({words} words)")]
    TooLarge { start: u16, words: usize },

    #[error(transparent)]
    Session(#[from] SessionError),
}

const TITLE: std::ops::Range<usize> = 1..17;
const CAPACITY: usize = 17;
const FS_INFO: std::ops::Range<usize> = 18..22;
const PASSWORD: std::ops::Range<usize> = 22..32;
const OPTIONS: usize = 32;

/// Parsed program header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramHeader {
    pub model: u16,
    pub title: String,
    /// Program capacity in steps.
    pub capacity: u16,
    pub fs_info: [u16; 4],
    pub password_set: bool,
    /// Option words (D8000 onwards).
    pub options: Vec<u16>,
}

impl ProgramHeader {
    pub fn from_words(words: &[u16]) -> Result<Self, ProgramError> {
        let expected = PROGRAM_HEADER_WORDS as usize;
        if words.len() < expected {
            return Err(ProgramError::ShortHeader {
                expected,
                actual: words.len(),
            });
        }

        let title: String = words_to_le_bytes(&words[TITLE])
            .into_iter()
            .map(|b| {
                if b.is_ascii() {
                    b as char
                } else {
                    char::REPLACEMENT_CHARACTER
                }
            })
            .collect();

        let mut fs_info = [0u16; 4];
        fs_info.copy_from_slice(&words[FS_INFO]);

        Ok(Self {
            model: words[0],
            title: title.trim_matches('\0').to_string(),
            capacity: words[CAPACITY],
            fs_info,
            password_set: words[PASSWORD].iter().any(|&w| w != 0xFFFF),
            options: words[OPTIONS..expected].to_vec(),
        })
    }

    /// File register capacity (D8000).
    pub fn file_register_capacity(&self) -> u16 {
        self.options[0]
    }

    /// Latched M relay range (D8001..D8002).
    pub fn latch_relays(&self) -> (u16, u16) {
        (self.options[1], self.options[2])
    }

    /// Latched D register range (D8006..D8007).
    pub fn latch_data_registers(&self) -> (u16, u16) {
        (self.options[6], self.options[7])
    }
}

/// Strip trailing end-of-program words. Returns true if any were present.
pub fn strip_end_sentinel(words: &mut Vec<u16>) -> bool {
    let before = words.len();
    while words.last() == Some(&PROGRAM_END_SENTINEL) {
        words.pop();
    }
    words.len() != before
}

/// Whitespace-separated hex words, with or without `0x`.
pub fn words_from_hex_text(text: &str) -> Result<Vec<u16>, ProgramError> {
    text.split_whitespace()
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u16::from_str_radix(digits, 16).map_err(|_| ProgramError::BadWord(token.to_string()))
        })
        .collect()
}

/// Little-endian 16-bit words.
pub fn words_from_le_bytes(bytes: &[u8]) -> Result<Vec<u16>, ProgramError> {
    if bytes.len() % 2 != 0 {
        return Err(ProgramError::OddByteCount(bytes.len()));
    }
    let mut words = vec![0u16; bytes.len() / 2];
    LittleEndian::read_u16_into(bytes, &mut words);
    Ok(words)
}

pub fn words_to_le_bytes(words: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 2];
    LittleEndian::write_u16_into(words, &mut bytes);
    bytes
}

impl<T: SerialTransport, O: PlcObserver> PlcSession<T, O> {
    /// Read and parse the header block at flash address 0.
    #[instrument(skip(self))]
    pub fn read_program_header(&mut self) -> Result<ProgramHeader, ProgramError> {
        let words = self.read_flash(0, PROGRAM_HEADER_WORDS)?;
        ProgramHeader::from_words(&words)
    }

    /// Read the program body chunk by chunk until the end sentinel.
    ///
    /// Sentinel words are stripped. In dry run this returns after the
    /// first (empty) chunk.
    #[instrument(skip(self))]
    pub fn read_program_body(&mut self) -> Result<Vec<u16>, ProgramError> {
        let mut body = Vec::new();
        let mut address = PROGRAM_BODY_START;
        let mut chunks = 0u64;

        loop {
            let mut chunk = self.read_flash(address, PROGRAM_CHUNK_WORDS)?;
            if chunk.is_empty() {
                break;
            }
            let done = strip_end_sentinel(&mut chunk);
            body.extend_from_slice(&chunk);
            chunks += 1;
            self.observer().on_event(&PlcEvent::Progress {
                operation: "program read".to_string(),
                current: body.len() as u64,
                total: body.len() as u64,
            });
            if done {
                break;
            }
            address = match address.checked_add(PROGRAM_CHUNK_BYTES) {
                Some(next) => next,
                None => break,
            };
        }

        info!(words = body.len(), chunks, "Program body read");
        Ok(body)
    }

    /// Write the program body from the start of the program area, one
    /// 64-word flash write per chunk.
    #[instrument(skip(self, words), fields(words = words.len()))]
    pub fn write_program_body(&mut self, words: &[u16]) -> Result<(), ProgramError> {
        let total = words.len() as u64;
        let chunk_words = PROGRAM_CHUNK_WORDS as usize;
        let mut written = 0u64;

        for (i, chunk) in words.chunks(chunk_words).enumerate() {
            let address = (i as u32)
                .checked_mul(PROGRAM_CHUNK_BYTES as u32)
                .and_then(|offset| u16::try_from(offset + PROGRAM_BODY_START as u32).ok())
                .ok_or(ProgramError::TooLarge {
                    start: PROGRAM_BODY_START,
                    words: words.len(),
                })?;

            let status = self.write_flash(address, chunk)?;
            if !status.is_ok() {
                return Err(ProgramError::WriteRejected { address, status });
            }

            written += chunk.len() as u64;
            debug!(address = %format!("{:04X}", address), words = chunk.len(), "Chunk written");
            self.observer().on_event(&PlcEvent::Progress {
                operation: "program write".to_string(),
                current: written,
                total,
            });
        }

        info!(words = words.len(), "Program body written");
        Ok(())
    }
}
