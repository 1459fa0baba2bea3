//! CPU6 register file.
//!
//! The registers live in a 256-byte scratchpad (SRAM) that also answers
//! logical addresses 0x00-0xFF. It holds 16 banks of 16 bytes; the bank in
//! use is the current interrupt level, so a register access always goes
//! through `(ipl << 4) | index`.
//!
//! Each bank holds eight word registers, each splitting into a high and a
//! low byte register:
//!
//! | word | A | B | X | Y | Z | S | C | P |
//! |------|---|---|---|---|---|---|---|---|
//! | index| 0 | 2 | 4 | 6 | 8 | A | C | E |

use serde::{Serialize, Deserialize};
use std::fmt;

/// Size of the scratchpad in bytes.
pub const SRAM_SIZE: usize = 0x100;

/// A word register, numbered by its byte offset inside a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reg {
    A = 0,
    B = 2,
    X = 4,
    Y = 6,
    Z = 8,
    S = 10,
    C = 12,
    P = 14,
}

impl Reg {
    pub const ALL: [Reg; 8] = [Reg::A, Reg::B, Reg::X, Reg::Y, Reg::Z, Reg::S, Reg::C, Reg::P];

    #[inline]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// The word register at an even byte offset.
    pub fn from_index(index: u8) -> Option<Reg> {
        if index & 1 == 0 {
            Self::ALL.get((index >> 1) as usize).copied()
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg::A => "A",
            Reg::B => "B",
            Reg::X => "X",
            Reg::Y => "Y",
            Reg::Z => "Z",
            Reg::S => "S",
            Reg::C => "C",
            Reg::P => "P",
        }
    }
}

/// Byte register offsets used by the implicit-operand instructions.
pub mod byte {
    pub const AH: u8 = 0;
    pub const AL: u8 = 1;
    pub const BH: u8 = 2;
    pub const BL: u8 = 3;
    pub const XH: u8 = 4;
    pub const XL: u8 = 5;
    pub const YH: u8 = 6;
    pub const YL: u8 = 7;
    pub const ZH: u8 = 8;
    pub const ZL: u8 = 9;
    pub const SH: u8 = 10;
    pub const SL: u8 = 11;
    pub const CH: u8 = 12;
    pub const CL: u8 = 13;
    pub const PH: u8 = 14;
    pub const PL: u8 = 15;

    const NAMES: [&str; 16] = [
        "AH", "AL", "BH", "BL", "XH", "XL", "YH", "YL",
        "ZH", "ZL", "SH", "SL", "CH", "CL", "PH", "PL",
    ];

    pub fn name(index: u8) -> &'static str {
        NAMES[(index & 0xF) as usize]
    }
}

/// Name of a word-sized explicit register operand. Odd offsets are legal
/// operands and read with the odd-address quirk, so they get a raw name.
pub fn word_name(index: u8) -> String {
    match Reg::from_index(index & 0xF) {
        Some(reg) => reg.name().to_string(),
        None => format!("R{}", index & 0xF),
    }
}

/// The 256-byte register scratchpad.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    sram: Vec<u8>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self { sram: vec![0; SRAM_SIZE] }
    }

    /// Zero every bank.
    pub fn reset(&mut self) {
        self.sram.fill(0);
    }

    #[inline]
    pub fn read_u8(&self, addr: u8) -> u8 {
        self.sram[addr as usize]
    }

    #[inline]
    pub fn write_u8(&mut self, addr: u8, value: u8) {
        self.sram[addr as usize] = value;
    }

    /// Big-endian word read.
    ///
    /// At an odd address both halves come from the even byte below it.
    pub fn read_u16(&self, addr: u8) -> u16 {
        if addr & 1 == 1 {
            let b = self.read_u8(addr & 0xFE);
            u16::from_be_bytes([b, b])
        } else {
            u16::from_be_bytes([self.read_u8(addr), self.read_u8(addr + 1)])
        }
    }

    /// Big-endian word write.
    ///
    /// At an odd address both halves land on the even byte, low half last.
    pub fn write_u16(&mut self, addr: u8, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        if addr & 1 == 1 {
            let even = addr & 0xFE;
            self.write_u8(even, hi);
            self.write_u8(even, lo);
        } else {
            self.write_u8(addr, hi);
            self.write_u8(addr + 1, lo);
        }
    }

    /// Byte register `index` of the bank for `ipl`.
    #[inline]
    pub fn get_u8(&self, ipl: u8, index: u8) -> u8 {
        self.read_u8(bank_addr(ipl, index))
    }

    #[inline]
    pub fn set_u8(&mut self, ipl: u8, index: u8, value: u8) {
        self.write_u8(bank_addr(ipl, index), value);
    }

    /// Word at byte offset `index` of the bank for `ipl`.
    #[inline]
    pub fn get_u16(&self, ipl: u8, index: u8) -> u16 {
        self.read_u16(bank_addr(ipl, index))
    }

    #[inline]
    pub fn set_u16(&mut self, ipl: u8, index: u8, value: u16) {
        self.write_u16(bank_addr(ipl, index), value);
    }

    pub fn get(&self, ipl: u8, reg: Reg) -> u16 {
        self.get_u16(ipl, reg.index())
    }

    pub fn set(&mut self, ipl: u8, reg: Reg, value: u16) {
        self.set_u16(ipl, reg.index(), value);
    }

    /// Raw view of the whole scratchpad.
    pub fn as_bytes(&self) -> &[u8] {
        &self.sram
    }
}

#[inline]
fn bank_addr(ipl: u8, index: u8) -> u8 {
    (ipl & 0xF) << 4 | (index & 0xF)
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for bank in self.sram.chunks(16) {
            list.entry(&format_args!("{:02X?}", bank));
        }
        list.finish()
    }
}
