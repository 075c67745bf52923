use std::fmt;

use crate::mem::Word;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    InvalidOpcode { word: Word, index: u8 },
    Malformed { text: String },
    FormatMismatch { word: Word, opcode: Opcode, format: Format },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidOpcode { word, index } => {
                write!(f, "invalid opcode {} in word 0x{:08x}", index, word)
            }
            DecodeError::Malformed { text } => write!(f, "malformed word: {:?}", text),
            DecodeError::FormatMismatch {
                word,
                opcode,
                format,
            } => write!(
                f,
                "{} has no operands in {:?} format: 0x{:08x}",
                opcode, format, word
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Operand layout, selected by the two most significant bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Arithmetic = 0b00,
    Conditional = 0b01,
    Unconditional = 0b10,
    Io = 0b11,
}

impl Format {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Format::Arithmetic,
            0b01 => Format::Conditional,
            0b10 => Format::Unconditional,
            _ => Format::Io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Rd,
    Wr,
    St,
    Lw,
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Movi,
    Addi,
    Muli,
    Divi,
    Ldi,
    Slt,
    Slti,
    Hlt,
    Nop,
    Jmp,
    Beq,
    Bne,
    Bez,
    Bnz,
    Bgz,
    Blz,
}

impl Opcode {
    /// Opcode table, indexed by bits [2,8) of the word.
    pub const TABLE: [Opcode; 27] = [
        Opcode::Rd,
        Opcode::Wr,
        Opcode::St,
        Opcode::Lw,
        Opcode::Mov,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::And,
        Opcode::Or,
        Opcode::Movi,
        Opcode::Addi,
        Opcode::Muli,
        Opcode::Divi,
        Opcode::Ldi,
        Opcode::Slt,
        Opcode::Slti,
        Opcode::Hlt,
        Opcode::Nop,
        Opcode::Jmp,
        Opcode::Beq,
        Opcode::Bne,
        Opcode::Bez,
        Opcode::Bnz,
        Opcode::Bgz,
        Opcode::Blz,
    ];

    pub fn from_index(index: u8) -> Option<Opcode> {
        Self::TABLE.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Rd => "RD",
            Opcode::Wr => "WR",
            Opcode::St => "ST",
            Opcode::Lw => "LW",
            Opcode::Mov => "MOV",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Movi => "MOVI",
            Opcode::Addi => "ADDI",
            Opcode::Muli => "MULI",
            Opcode::Divi => "DIVI",
            Opcode::Ldi => "LDI",
            Opcode::Slt => "SLT",
            Opcode::Slti => "SLTI",
            Opcode::Hlt => "HLT",
            Opcode::Nop => "NOP",
            Opcode::Jmp => "JMP",
            Opcode::Beq => "BEQ",
            Opcode::Bne => "BNE",
            Opcode::Bez => "BEZ",
            Opcode::Bnz => "BNZ",
            Opcode::Bgz => "BGZ",
            Opcode::Blz => "BLZ",
        }
    }

    /// RD and WR count as I/O for the metrics.
    pub fn is_io(self) -> bool {
        matches!(self, Opcode::Rd | Opcode::Wr)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Address operand: the raw bit field and its word index (raw / 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub raw: u32,
    pub index: usize,
}

impl Address {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            raw,
            index: (raw / 4) as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    // 00: reg1 reg2 reg3
    Arithmetic { reg1: u8, reg2: u8, reg3: u8 },
    // 01: reg1 reg2 addr16
    Conditional { reg1: u8, reg2: u8, addr: Address },
    // 10: addr24
    Unconditional { addr: Address },
    // 11: reg1 reg2 addr16
    Io { reg1: u8, reg2: u8, addr: Address },
}

impl Operands {
    pub fn format(&self) -> Format {
        match self {
            Operands::Arithmetic { .. } => Format::Arithmetic,
            Operands::Conditional { .. } => Format::Conditional,
            Operands::Unconditional { .. } => Format::Unconditional,
            Operands::Io { .. } => Format::Io,
        }
    }

    /// Register pair plus address, carried by the conditional and I/O formats.
    pub fn reg_addr(&self) -> Option<(u8, u8, Address)> {
        match *self {
            Operands::Conditional { reg1, reg2, addr } | Operands::Io { reg1, reg2, addr } => {
                Some((reg1, reg2, addr))
            }
            _ => None,
        }
    }

    pub fn address(&self) -> Option<Address> {
        match *self {
            Operands::Conditional { addr, .. }
            | Operands::Io { addr, .. }
            | Operands::Unconditional { addr } => Some(addr),
            Operands::Arithmetic { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub opcode: Opcode,
    pub operands: Operands,
}

/// Parse the textual form of a word: up to 8 hex digits, optional `0x`.
/// Shorter text is zero-padded on the left.
pub fn parse_word(text: &str) -> Result<Word, DecodeError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 8 {
        return Err(DecodeError::Malformed {
            text: text.to_string(),
        });
    }
    Word::from_str_radix(digits, 16).map_err(|_| DecodeError::Malformed {
        text: text.to_string(),
    })
}

// Field positions are counted from the most significant bit, so bits [8,12)
// of the word sit at shift 20.
fn field(word: Word, start: u32, width: u32) -> u32 {
    (word >> (32 - start - width)) & ((1 << width) - 1)
}

pub fn decode(word: Word) -> Result<Instr, DecodeError> {
    let format = Format::from_bits(field(word, 0, 2));
    let index = field(word, 2, 6) as u8;
    let opcode = Opcode::from_index(index).ok_or(DecodeError::InvalidOpcode { word, index })?;

    let operands = match format {
        Format::Arithmetic => Operands::Arithmetic {
            reg1: field(word, 8, 4) as u8,
            reg2: field(word, 12, 4) as u8,
            reg3: field(word, 16, 4) as u8,
        },
        Format::Conditional => Operands::Conditional {
            reg1: field(word, 8, 4) as u8,
            reg2: field(word, 12, 4) as u8,
            addr: Address::from_raw(field(word, 16, 16)),
        },
        Format::Io => Operands::Io {
            reg1: field(word, 8, 4) as u8,
            reg2: field(word, 12, 4) as u8,
            addr: Address::from_raw(field(word, 16, 16)),
        },
        Format::Unconditional => Operands::Unconditional {
            addr: Address::from_raw(field(word, 8, 24)),
        },
    };

    Ok(Instr { opcode, operands })
}

/// Inverse of [`decode`]. Register fields are masked to 4 bits and the raw
/// address to the width of its format.
pub fn encode(instr: Instr) -> Word {
    let head = ((instr.operands.format() as u32) << 30) | ((instr.opcode.index() as u32) << 24);
    let reg = |r: u8| (r as u32) & 0xf;
    match instr.operands {
        Operands::Arithmetic { reg1, reg2, reg3 } => {
            head | (reg(reg1) << 20) | (reg(reg2) << 16) | (reg(reg3) << 12)
        }
        Operands::Conditional { reg1, reg2, addr } | Operands::Io { reg1, reg2, addr } => {
            head | (reg(reg1) << 20) | (reg(reg2) << 16) | (addr.raw & 0xffff)
        }
        Operands::Unconditional { addr } => head | (addr.raw & 0xff_ffff),
    }
}
