//! Operand decoding.

use super::DecodeIssue;

/// Type tag carried in the high byte of a generic operand's first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandTag {
    /// `K`: 16-bit constant.
    Constant,
    /// `D`: data register.
    DataRegister,
    /// `KnM`: bit-device group.
    BitDeviceGroup,
    /// Timer/counter/data register accessed as a 16-bit value.
    TimerCounterValue,
    /// `P`: pointer.
    Pointer,
}

impl OperandTag {
    pub fn from_byte(tag: u8) -> Option<Self> {
        match tag {
            0x80 => Some(OperandTag::Constant),
            0x82 => Some(OperandTag::DataRegister),
            0x84 => Some(OperandTag::BitDeviceGroup),
            0x86 => Some(OperandTag::TimerCounterValue),
            0x88 => Some(OperandTag::Pointer),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            OperandTag::Constant => "K",
            OperandTag::DataRegister => "D",
            OperandTag::BitDeviceGroup => "Kn",
            OperandTag::TimerCounterValue => "T/C",
            OperandTag::Pointer => "P",
        }
    }
}

/// One decoded operand and the words it used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub text: String,
    pub words: usize,
    pub issue: Option<DecodeIssue>,
}

impl Operand {
    fn ok(text: String, words: usize) -> Self {
        Self {
            text,
            words,
            issue: None,
        }
    }

    fn with_issue(text: String, words: usize, issue: DecodeIssue) -> Self {
        Self {
            text,
            words,
            issue: Some(issue),
        }
    }
}

/// Decode the generic operand starting at `words[index]`.
///
/// `timer_constant` selects the preset layout for `K` values
/// (`low + (next & 0xFF) * 0x100`) instead of `(next << 8) | low`.
pub fn decode_operand(words: &[u16], index: usize, timer_constant: bool) -> Operand {
    let Some(&first) = words.get(index) else {
        return Operand::with_issue(
            "???".to_string(),
            0,
            DecodeIssue::Truncated {
                needed: 1,
                available: 0,
            },
        );
    };
    let [low, tag_byte] = first.to_le_bytes();

    let Some(tag) = OperandTag::from_byte(tag_byte) else {
        return Operand::with_issue(
            format!("Unknown({:04X})", first),
            1,
            DecodeIssue::UnsupportedOperand(first),
        );
    };

    let Some(&value) = words.get(index + 1) else {
        return Operand::with_issue(
            format!("{}???", tag.prefix()),
            1,
            DecodeIssue::Truncated {
                needed: 2,
                available: 1,
            },
        );
    };
    let low = low as u32;
    let wide = ((value as u32) << 8) | low;

    let text = match tag {
        OperandTag::Constant if timer_constant => {
            format!("K{}", low + (value as u32 & 0xFF) * 0x100)
        }
        OperandTag::Constant => format!("K{}", wide),
        OperandTag::DataRegister => format!("D{}", wide),
        OperandTag::BitDeviceGroup => format!("K{}M{}", value, low),
        OperandTag::Pointer => format!("P{}", low),
        OperandTag::TimerCounterValue => {
            let [value_low, kind] = value.to_le_bytes();
            let number = (low + ((value_low as u32) << 8)) / 2;
            match kind {
                0x80 => format!("D{}", 8000 + number),
                0x82 => format!("C{}", number),
                0x84 => format!("T{}", number),
                0x86 => format!("D{}", number),
                0x88 => format!("D{}", 1000 + number),
                _ => {
                    return Operand::with_issue(
                        format!("{}{:02X}:{:04X}", tag.prefix(), low, value),
                        2,
                        DecodeIssue::UnsupportedOperand(value),
                    );
                }
            }
        }
    };
    Operand::ok(text, 2)
}

/// Device in the second word of an extended bit instruction.
pub fn decode_extended_bit_operand(word: u16) -> Result<String, DecodeIssue> {
    let [low, high] = word.to_le_bytes();
    let low = low as u32;
    let high_off = |start: u8| (high - start) as u32;

    let text = match (high, low) {
        (0xAA, _) => format!("M{}", 2048 + low),
        (0xAD, 0xB8) => "M3000".to_string(),
        (0x90, 0xFF) => "M8511".to_string(),
        (0xA8..=0xAF, _) => format!("M{}", 2000 + high_off(0xA8) * 256 + low),
        (0x90..=0x9F, _) => format!("M{}", 8000 + high_off(0x90) * 32 + low),
        (0x80..=0x87, _) => format!("S{}", 500 + high_off(0x80) * 256 + low),
        _ => return Err(DecodeIssue::UnsupportedOperand(word)),
    };
    Ok(text)
}
