//! Opcode tables.
//!
//! Word tables are sorted by opcode and searched with `binary_search_by_key`.
//! Basic bit instructions are keyed on the high byte: its high nibble picks
//! the mnemonic, its low nibble the device class.

/// Device class addressed by a basic bit instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitClass {
    S,
    X,
    Y,
    /// Timer contact.
    TimerStatus,
    /// Timer coil.
    Timer,
    /// M relay bank starting at `base`.
    M { base: u16 },
    /// Counter contact.
    CounterStatus,
    /// Counter coil.
    Counter,
    /// M8000 and up.
    SpecialM,
}

impl BitClass {
    /// Render the operand for in-class offset `offset`.
    pub fn render(&self, offset: u8) -> String {
        match self {
            BitClass::S => format!("S{}", offset),
            BitClass::X => format!("X{:o}", offset),
            BitClass::Y => format!("Y{:o}", offset),
            BitClass::TimerStatus => format!("TS{}", offset),
            BitClass::Timer => format!("T{}", offset),
            BitClass::M { base } => format!("M{}", base + offset as u16),
            BitClass::CounterStatus => format!("CS{}", offset),
            BitClass::Counter => format!("C{}", offset),
            BitClass::SpecialM => format!("M{}", 8000 + offset as u16),
        }
    }
}

/// Mnemonic and device class for a basic bit instruction's high byte.
pub fn basic_bit(high: u8) -> Option<(&'static str, BitClass)> {
    let mnemonic = match high >> 4 {
        0x2 => "LD",
        0x3 => "LDI",
        0x4 => "AND",
        0x5 => "ANI",
        0x6 => "OR",
        0x7 => "ORI",
        0xC => "OUT",
        0xD => "SET",
        0xE => "RST",
        _ => return None,
    };
    let contact = high >> 4 <= 0x7;
    let class = match (high & 0x0F, high >> 4) {
        (0x0, _) => BitClass::S,
        (0x4, _) if contact => BitClass::X,
        (0x4 | 0x5, _) if !contact => BitClass::Y,
        (0x6, _) if contact => BitClass::TimerStatus,
        (0x6, 0xC | 0xE) => BitClass::Timer,
        (bank @ 0x8..=0xD, _) => BitClass::M {
            base: (bank as u16 - 8) * 256,
        },
        (0xE, _) if contact => BitClass::CounterStatus,
        (0xE, 0xC | 0xE) => BitClass::Counter,
        (0xF, 0x2 | 0x3) => BitClass::SpecialM,
        _ => return None,
    };
    Some((mnemonic, class))
}

/// `0xBx` high byte: `LABEL P<low>`.
pub fn is_label(high: u8) -> bool {
    high & 0xF0 == 0xB0
}

/// Single-word instructions with no operands.
pub static SINGLE_WORD: &[(u16, &str)] = &[
    (0x000F, "END"),
    (0xF7FF, "RET"),
    (0xFFF8, "ANB"),
    (0xFFF9, "ORB"),
    (0xFFFA, "MPS"),
    (0xFFFB, "MRD"),
    (0xFFFC, "MPP"),
    (0xFFFD, "INV"),
];

/// Bit instructions whose device is in the following word.
pub static EXTENDED_BIT: &[(u16, &str)] = &[
    // Extended M
    (0x0002, "OUT"),
    (0x0003, "SET"),
    (0x0004, "RST"),
    // Extended S
    (0x0005, "OUT"),
    (0x0006, "SET"),
    (0x0007, "RST"),
    (0x01C2, "LD"),
    (0x01C3, "LDI"),
    (0x01C4, "AND"),
    (0x01C5, "ANI"),
    (0x01C6, "OR"),
    (0x01C7, "ORI"),
    // Edge contacts
    (0x01CA, "LDP"),
    (0x01CB, "LDF"),
    (0x01CC, "ANDP"),
    (0x01CD, "ANDF"),
    (0x01CE, "ORP"),
    (0x01CF, "ORF"),
];

/// Inline compare contacts; two generic operands each.
pub static COMPARE: &[(u16, &str)] = &[
    (0x01D0, "LD="),
    (0x01D2, "LD>"),
    (0x01D4, "LD<"),
    (0x01D8, "LD<>"),
    (0x01DA, "LD<="),
    (0x01DC, "LD>="),
    (0x01E0, "AND="),
    (0x01E2, "AND>"),
    (0x01E4, "AND<"),
    (0x01E8, "AND<>"),
    (0x01EA, "AND<="),
    (0x01EC, "AND>="),
    (0x01F0, "OR="),
    (0x01F2, "OR>"),
    (0x01F4, "OR<"),
    (0x01F8, "OR<>"),
    (0x01FA, "OR<="),
    (0x01FC, "OR>="),
];

/// Applied instruction: mnemonic, operand count, and whether a constant
/// first operand uses the timer/counter layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub mnemonic: &'static str,
    pub arity: usize,
    pub timer_constant_source: bool,
}

const fn applied(mnemonic: &'static str, arity: usize, timer_constant_source: bool) -> Applied {
    Applied {
        mnemonic,
        arity,
        timer_constant_source,
    }
}

pub static APPLIED: &[(u16, Applied)] = &[
    (0x0010, applied("CJ", 1, false)),
    (0x0012, applied("CALL", 1, false)),
    (0x0028, applied("MOV", 2, true)),
    (0x0038, applied("ADD", 3, false)),
    (0x003A, applied("SUB", 3, false)),
    (0x003C, applied("MUL", 3, false)),
    (0x003E, applied("DIV", 3, false)),
    (0x1028, applied("MOVP", 2, true)),
    (0x1038, applied("ADDP", 3, false)),
    (0x103A, applied("SUBP", 3, false)),
    (0x103C, applied("MULP", 3, false)),
    (0x103E, applied("DIVP", 3, false)),
];

/// `RST T/C` opcode; the device is in the following word.
pub const RST_TIMER_COUNTER: u16 = 0x000C;
/// High byte of `OUT T<n>`, followed by a preset operand.
pub const OUT_TIMER_HIGH: u8 = 0x06;
/// High byte of `OUT C<n>`, followed by a preset operand.
pub const OUT_COUNTER_HIGH: u8 = 0x0E;

pub fn lookup<T: Copy>(table: &[(u16, T)], word: u16) -> Option<T> {
    table
        .binary_search_by_key(&word, |(opcode, _)| *opcode)
        .ok()
        .map(|i| table[i].1)
}
