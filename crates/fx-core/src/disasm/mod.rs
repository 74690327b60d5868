//! Ladder program disassembler.
//!
//! Program memory is a flat run of 16-bit words. Each step matches the word at
//! the cursor against the opcode tiers in [`tables`], pulls in any operand
//! words, and yields one [`DecodedInstruction`]. Every step consumes at least
//! one word, so garbage input still decodes to the end as `Unknown(..)` entries.

pub mod operand;
pub mod tables;

use std::fmt;

use thiserror::Error;

use self::operand::{decode_extended_bit_operand, decode_operand};
use self::tables::{
    APPLIED, COMPARE, EXTENDED_BIT, OUT_COUNTER_HIGH, OUT_TIMER_HIGH, RST_TIMER_COUNTER,
    SINGLE_WORD, basic_bit, is_label, lookup,
};

/// Why an instruction was only partially decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeIssue {
    #[error("Unsupported operand word {0:04X}")]
    UnsupportedOperand(u16),

    #[error("No opcode table matches word {0:04X}")]
    DecodeAmbiguous(u16),

    #[error("Instruction needs {needed} words, only {available} left")]
    Truncated { needed: usize, available: usize },
}

/// One disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Raw words this instruction consumed.
    pub words: Vec<u16>,
    pub mnemonic: String,
    pub operands: Vec<String>,
    /// Set when part of the instruction could not be resolved.
    pub issue: Option<DecodeIssue>,
}

impl DecodedInstruction {
    /// Number of words consumed.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Raw words as space separated hex.
    pub fn words_hex(&self) -> String {
        self.words
            .iter()
            .map(|w| format!("{:04X}", w))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

/// Builder used while decoding a single step.
struct Step<'a> {
    words: &'a [u16],
    index: usize,
}

impl Step<'_> {
    fn available(&self) -> usize {
        self.words.len() - self.index
    }

    fn emit(
        &self,
        consumed: usize,
        mnemonic: impl Into<String>,
        operands: Vec<String>,
        issue: Option<DecodeIssue>,
    ) -> DecodedInstruction {
        DecodedInstruction {
            words: self.words[self.index..self.index + consumed].to_vec(),
            mnemonic: mnemonic.into(),
            operands,
            issue,
        }
    }

    /// `mnemonic ???`, one word, when fewer than `needed` words remain.
    fn truncated(
        &self,
        mnemonic: &str,
        mut operands: Vec<String>,
        needed: usize,
    ) -> DecodedInstruction {
        operands.push("???".to_string());
        self.emit(
            1,
            mnemonic,
            operands,
            Some(DecodeIssue::Truncated {
                needed,
                available: self.available(),
            }),
        )
    }

    /// Opcode word followed by `count` generic operands.
    fn with_operands(
        &self,
        mnemonic: &str,
        mut operands: Vec<String>,
        count: usize,
        timer_constant_first: bool,
    ) -> DecodedInstruction {
        let needed = 1 + 2 * count;
        if self.available() < needed {
            return self.truncated(mnemonic, operands, needed);
        }

        let mut cursor = self.index + 1;
        let mut issue = None;
        for n in 0..count {
            let op = decode_operand(self.words, cursor, timer_constant_first && n == 0);
            cursor += op.words;
            operands.push(op.text);
            issue = issue.or(op.issue);
        }
        self.emit(cursor - self.index, mnemonic, operands, issue)
    }
}

/// Decode the instruction starting at `words[index]`.
///
/// Returns `None` only when `index` is past the end.
pub fn decode_at(words: &[u16], index: usize) -> Option<DecodedInstruction> {
    let word = *words.get(index)?;
    let step = Step { words, index };
    let [low, high] = word.to_le_bytes();

    if let Some(mnemonic) = lookup(SINGLE_WORD, word) {
        return Some(step.emit(1, mnemonic, Vec::new(), None));
    }

    if let Some((mnemonic, class)) = basic_bit(high) {
        return Some(step.emit(1, mnemonic, vec![class.render(low)], None));
    }

    if is_label(high) {
        return Some(step.emit(1, "LABEL", vec![format!("P{}", low)], None));
    }

    if let Some(mnemonic) = lookup(EXTENDED_BIT, word) {
        let Some(&device) = words.get(index + 1) else {
            return Some(step.truncated(mnemonic, Vec::new(), 2));
        };
        let instr = match decode_extended_bit_operand(device) {
            Ok(text) => step.emit(2, mnemonic, vec![text], None),
            Err(issue) => step.emit(
                2,
                mnemonic,
                vec![format!("Unknown({:04X})", device)],
                Some(issue),
            ),
        };
        return Some(instr);
    }

    if let Some(mnemonic) = lookup(COMPARE, word) {
        return Some(step.with_operands(mnemonic, Vec::new(), 2, false));
    }

    if let Some(applied) = lookup(APPLIED, word) {
        return Some(step.with_operands(
            applied.mnemonic,
            Vec::new(),
            applied.arity,
            applied.timer_constant_source,
        ));
    }

    if high == OUT_TIMER_HIGH || high == OUT_COUNTER_HIGH {
        let device = if high == OUT_TIMER_HIGH {
            format!("T{}", low)
        } else {
            format!("C{}", low)
        };
        return Some(step.with_operands("OUT", vec![device], 1, true));
    }

    if word == RST_TIMER_COUNTER {
        let Some(&device) = words.get(index + 1) else {
            return Some(step.truncated("RST", vec!["T/C".to_string()], 2));
        };
        let [dev_low, dev_high] = device.to_le_bytes();
        let instr = match dev_high {
            0x86 => step.emit(2, "RST", vec![format!("T{}", dev_low)], None),
            0x8E => step.emit(2, "RST", vec![format!("C{}", dev_low)], None),
            _ => step.emit(
                2,
                "RST",
                vec!["T/C".to_string(), format!("Unknown({:04X})", device)],
                Some(DecodeIssue::UnsupportedOperand(device)),
            ),
        };
        return Some(instr);
    }

    Some(step.emit(
        1,
        format!("Unknown({:04X})", word),
        Vec::new(),
        Some(DecodeIssue::DecodeAmbiguous(word)),
    ))
}

/// Iterator over the instructions in a word slice.
pub struct Disassembler<'a> {
    words: &'a [u16],
    index: usize,
}

impl<'a> Disassembler<'a> {
    pub fn new(words: &'a [u16]) -> Self {
        Self { words, index: 0 }
    }

    /// Word offset of the next instruction.
    pub fn position(&self) -> usize {
        self.index
    }
}

impl Iterator for Disassembler<'_> {
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<Self::Item> {
        let instr = decode_at(self.words, self.index)?;
        self.index += instr.len().max(1);
        Some(instr)
    }
}

/// Disassemble a whole program.
pub fn disassemble(words: &[u16]) -> Vec<DecodedInstruction> {
    Disassembler::new(words).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(words: &[u16]) -> Vec<String> {
        disassemble(words).iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_end_is_single_word() {
        let out = disassemble(&[0x000F]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_string(), "END");
        assert_eq!(out[0].len(), 1);
        assert!(out[0].issue.is_none());
    }

    #[test]
    fn test_unknown_word_makes_progress() {
        let out = disassemble(&[0xFFFE]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mnemonic, "Unknown(FFFE)");
        assert_eq!(out[0].words, vec![0xFFFE]);
        assert_eq!(out[0].issue, Some(DecodeIssue::DecodeAmbiguous(0xFFFE)));
    }

    #[test]
    fn test_mov_constant_to_register() {
        let out = disassemble(&[0x0028, 0x8064, 0x0000, 0x820A, 0x0000]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_string(), "MOV K100 D10");
        assert_eq!(out[0].len(), 5);
    }

    #[test]
    fn test_arithmetic_three_operands() {
        let words = [0x0038, 0x8200, 0x0000, 0x8005, 0x0000, 0x8201, 0x0000, 0x000F];
        assert_eq!(text(&words), vec!["ADD D0 K5 D1", "END"]);
    }

    #[test]
    fn test_basic_bits_and_label() {
        let words = [0x2400, 0x4B02, 0xC508, 0x2F02, 0xB003, 0xFFF9];
        assert_eq!(
            text(&words),
            vec!["LD X0", "AND M770", "OUT Y10", "LD M8002", "LABEL P3", "ORB"]
        );
    }

    #[test]
    fn test_extended_and_pulsed_bits() {
        let words = [0x01CA, 0xAA00, 0x0003, 0x8164, 0x01C2, 0x1234];
        let out = disassemble(&words);
        assert_eq!(out[0].to_string(), "LDP M2048");
        assert_eq!(out[1].to_string(), "SET S856");
        assert_eq!(out[2].to_string(), "LD Unknown(1234)");
        assert_eq!(out[2].issue, Some(DecodeIssue::UnsupportedOperand(0x1234)));
        assert!(out.iter().all(|i| i.len() == 2));
    }

    #[test]
    fn test_compare_contact() {
        let words = [0x01E8, 0x8200, 0x0000, 0x800A, 0x0000];
        let out = disassemble(&words);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_string(), "AND<> D0 K10");
    }

    #[test]
    fn test_timer_output_and_reset() {
        let words = [0x0605, 0x8064, 0x0000, 0x000C, 0x8605, 0x000C, 0x8E02, 0x000C, 0x9000];
        assert_eq!(
            text(&words),
            vec!["OUT T5 K100", "RST T5", "RST C2", "RST T/C Unknown(9000)"]
        );
    }

    #[test]
    fn test_counter_preset_layout() {
        // Preset constants drop the value word's high byte
        let out = disassemble(&[0x0E01, 0x80F4, 0xAB01]);
        assert_eq!(out[0].to_string(), "OUT C1 K500");
    }

    #[test]
    fn test_program_control() {
        assert_eq!(text(&[0x0010, 0x8807, 0x0000]), vec!["CJ P7"]);
        assert_eq!(text(&[0x0012, 0x8801, 0x0000]), vec!["CALL P1"]);
    }

    #[test]
    fn test_truncated_instruction() {
        let out = disassemble(&[0x0028, 0x8064, 0x0000]);
        assert_eq!(out[0].to_string(), "MOV ???");
        assert_eq!(out[0].len(), 1);
        assert_eq!(
            out[0].issue,
            Some(DecodeIssue::Truncated {
                needed: 5,
                available: 3
            })
        );
        // Remaining words still decode
        assert_eq!(out.len(), 3);

        assert_eq!(text(&[0x0605]), vec!["OUT T5 ???"]);
        assert_eq!(text(&[0x000C]), vec!["RST T/C ???"]);
        assert_eq!(text(&[0x01C2]), vec!["LD ???"]);
    }

    #[test]
    fn test_unknown_operand_tag_shortens_instruction() {
        let words = [0x0028, 0x7F00, 0x8200, 0x0001, 0x0000];
        let out = disassemble(&words);
        assert_eq!(out[0].to_string(), "MOV Unknown(7F00) D256");
        assert_eq!(out[0].len(), 4);
        assert_eq!(out[0].issue, Some(DecodeIssue::UnsupportedOperand(0x7F00)));
    }

    #[test]
    fn test_iterator_position() {
        let words = [0x2400, 0x0028, 0x8001, 0x0000, 0x8200, 0x0000, 0x000F];
        let mut dis = Disassembler::new(&words);
        dis.next();
        assert_eq!(dis.position(), 1);
        dis.next();
        assert_eq!(dis.position(), 6);
        assert_eq!(dis.next().map(|i| i.mnemonic), Some("END".to_string()));
        assert!(dis.next().is_none());
    }

    #[test]
    fn test_words_hex() {
        let out = disassemble(&[0x0605, 0x8064, 0x0000]);
        assert_eq!(out[0].words_hex(), "0605 8064 0000");
    }

    proptest! {
        #[test]
        fn every_word_is_consumed_once(words in proptest::collection::vec(any::<u16>(), 0..200)) {
            let out = disassemble(&words);
            let consumed: Vec<u16> = out.iter().flat_map(|i| i.words.iter().copied()).collect();
            prop_assert_eq!(consumed, words);
            prop_assert!(out.iter().all(|i| !i.is_empty()));
        }
    }
}
