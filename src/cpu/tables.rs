//! Precomputed flag, shift, rotate and branch tables.
//!
//! The byte-wide unary operations and the branch decision are looked up
//! rather than computed on every step. The tables are built once from the
//! functions in [`crate::cpu::alu`] and shared read-only afterwards.

use crate::cpu::alu::{self, Width};
use crate::cpu::flags::Flags;
use serde::{Serialize, Deserialize};
use std::fmt;
use std::sync::OnceLock;

/// Branch condition selected by the low nibble of a group-1 opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// LINK set
    Link,
    NotLink,
    Fault,
    NotFault,
    /// VALUE set (result was zero)
    Zero,
    NotZero,
    Minus,
    Plus,
    /// Neither MINUS nor VALUE
    Greater,
    /// MINUS or VALUE
    LessOrEqual,
    Switch1,
    Switch2,
    Switch3,
    Switch4,
    /// Never taken
    Tm,
    /// Never taken
    Ep,
}

impl Condition {
    pub const ALL: [Condition; 16] = [
        Condition::Link,
        Condition::NotLink,
        Condition::Fault,
        Condition::NotFault,
        Condition::Zero,
        Condition::NotZero,
        Condition::Minus,
        Condition::Plus,
        Condition::Greater,
        Condition::LessOrEqual,
        Condition::Switch1,
        Condition::Switch2,
        Condition::Switch3,
        Condition::Switch4,
        Condition::Tm,
        Condition::Ep,
    ];

    pub fn from_nibble(n: u8) -> Self {
        Self::ALL[(n & 0xF) as usize]
    }

    pub fn to_nibble(self) -> u8 {
        self as u8
    }

    /// Whether the branch is taken for the given flags and front-panel switches.
    pub fn holds(self, flags: Flags, switches: u8) -> bool {
        match self {
            Condition::Link => flags.link(),
            Condition::NotLink => !flags.link(),
            Condition::Fault => flags.fault(),
            Condition::NotFault => !flags.fault(),
            Condition::Zero => flags.value(),
            Condition::NotZero => !flags.value(),
            Condition::Minus => flags.minus(),
            Condition::Plus => !flags.minus(),
            Condition::Greater => !flags.minus() && !flags.value(),
            Condition::LessOrEqual => flags.minus() || flags.value(),
            Condition::Switch1 => switches & 0x1 != 0,
            Condition::Switch2 => switches & 0x2 != 0,
            Condition::Switch3 => switches & 0x4 != 0,
            Condition::Switch4 => switches & 0x8 != 0,
            Condition::Tm | Condition::Ep => false,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Condition::Link => "BL",
            Condition::NotLink => "BNL",
            Condition::Fault => "BF",
            Condition::NotFault => "BNF",
            Condition::Zero => "BZ",
            Condition::NotZero => "BNZ",
            Condition::Minus => "BM",
            Condition::Plus => "BP",
            Condition::Greater => "BGZ",
            Condition::LessOrEqual => "BLE",
            Condition::Switch1 => "BS1",
            Condition::Switch2 => "BS2",
            Condition::Switch3 => "BS3",
            Condition::Switch4 => "BS4",
            Condition::Tm => "BTM",
            Condition::Ep => "BEP",
        }
    }
}

/// A looked-up unary result: the value and the flags it produces.
pub type Entry = (u8, Flags);

/// All lookup tables used by the execution engine.
pub struct Tables {
    logic_byte: Vec<Flags>,
    logic_word: Vec<Flags>,
    shift_right_byte: Vec<Entry>,
    shift_left_byte: Vec<Entry>,
    rotate_right_byte: Vec<Entry>,
    rotate_left_byte: Vec<Entry>,
    branch: Vec<u8>,
}

impl Tables {
    /// Build every table.
    pub fn build() -> Self {
        let logic_byte = (0..0x100u32).map(|v| alu::logic_flags(Width::Byte, v)).collect();
        let logic_word = (0..0x10000u32).map(|v| alu::logic_flags(Width::Word, v)).collect();

        let mut shift_right_byte = Vec::with_capacity(0x1000);
        let mut shift_left_byte = Vec::with_capacity(0x1000);
        for value in 0..0x100u16 {
            for count in 0..16u8 {
                shift_right_byte.push(narrow(alu::shift_right(Width::Byte, value, count)));
                shift_left_byte.push(narrow(alu::shift_left(Width::Byte, value, count)));
            }
        }

        let mut rotate_right_byte = Vec::with_capacity(0x2000);
        let mut rotate_left_byte = Vec::with_capacity(0x2000);
        for value in 0..0x100u16 {
            for count in 0..16u8 {
                for link in [false, true] {
                    rotate_right_byte.push(narrow(alu::rotate_right(Width::Byte, value, count, link)));
                    rotate_left_byte.push(narrow(alu::rotate_left(Width::Byte, value, count, link)));
                }
            }
        }

        let mut branch = vec![0u8; 0x1000];
        for flags in 0..16u8 {
            for cond in Condition::ALL {
                for switches in 0..16u8 {
                    let index = branch_index(Flags::from_bits(flags), cond, switches);
                    branch[index] = cond.holds(Flags::from_bits(flags), switches) as u8;
                }
            }
        }

        Self {
            logic_byte,
            logic_word,
            shift_right_byte,
            shift_left_byte,
            rotate_right_byte,
            rotate_left_byte,
            branch,
        }
    }

    #[inline]
    pub fn logic_byte(&self, value: u8) -> Flags {
        self.logic_byte[value as usize]
    }

    #[inline]
    pub fn logic_word(&self, value: u16) -> Flags {
        self.logic_word[value as usize]
    }

    #[inline]
    pub fn shift_right_byte(&self, value: u8, count: u8) -> Entry {
        self.shift_right_byte[unary_index(value, count)]
    }

    #[inline]
    pub fn shift_left_byte(&self, value: u8, count: u8) -> Entry {
        self.shift_left_byte[unary_index(value, count)]
    }

    #[inline]
    pub fn rotate_right_byte(&self, value: u8, count: u8, link: bool) -> Entry {
        self.rotate_right_byte[unary_index(value, count) << 1 | link as usize]
    }

    #[inline]
    pub fn rotate_left_byte(&self, value: u8, count: u8, link: bool) -> Entry {
        self.rotate_left_byte[unary_index(value, count) << 1 | link as usize]
    }

    /// Displacement multiplier for a branch: 1 when taken, 0 otherwise.
    #[inline]
    pub fn branch(&self, flags: Flags, cond: Condition, switches: u8) -> u8 {
        self.branch[branch_index(flags, cond, switches)]
    }
}

impl fmt::Debug for Tables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tables")
            .field("logic_word", &self.logic_word.len())
            .field("rotate_left_byte", &self.rotate_left_byte.len())
            .field("branch", &self.branch.len())
            .finish_non_exhaustive()
    }
}

/// The process-wide tables, built on first use.
pub fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(Tables::build)
}

#[inline]
fn unary_index(value: u8, count: u8) -> usize {
    (value as usize) << 4 | (count & 0xF) as usize
}

#[inline]
fn branch_index(flags: Flags, cond: Condition, switches: u8) -> usize {
    (flags.bits() as usize) << 8 | (cond.to_nibble() as usize) << 4 | (switches & 0xF) as usize
}

fn narrow((value, flags): (u16, Flags)) -> Entry {
    (value as u8, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logic_tables_match_direct() {
        let t = tables();
        for v in 0..=0xFFu8 {
            assert_eq!(t.logic_byte(v), alu::logic_flags(Width::Byte, v as u32));
            // the inverted operand goes through the same lookup
            assert_eq!(t.logic_byte(!v), alu::logic_flags(Width::Byte, !v as u32));
        }
        assert_eq!(t.logic_word(0), Flags::VALUE);
        assert_eq!(t.logic_word(0x8000), Flags::MINUS);
        assert_eq!(t.logic_word(0x00FF), Flags::NONE);
    }

    #[test]
    fn test_shift_tables() {
        let t = tables();
        assert_eq!(t.shift_right_byte(0x80, 0), (0xC0, Flags::MINUS));
        assert_eq!(t.shift_right_byte(0x04, 1), (0x01, Flags::NONE));
        assert_eq!(t.shift_left_byte(0x81, 0), (0x02, Flags::LINK | Flags::FAULT));
        assert_eq!(t.shift_left_byte(0x01, 6), (0x80, Flags::MINUS | Flags::FAULT));
    }

    #[test]
    fn test_rotate_tables_use_link() {
        let t = tables();
        assert_eq!(t.rotate_right_byte(0x00, 0, true), (0x80, Flags::MINUS));
        assert_eq!(t.rotate_left_byte(0x80, 0, false), (0x00, Flags::VALUE | Flags::LINK | Flags::FAULT));
        assert_eq!(t.rotate_left_byte(0x00, 0, true), (0x01, Flags::NONE));
    }

    #[test]
    fn test_branch_conditions() {
        let t = tables();
        assert_eq!(t.branch(Flags::LINK, Condition::Link, 0), 1);
        assert_eq!(t.branch(Flags::LINK, Condition::NotLink, 0), 0);
        assert_eq!(t.branch(Flags::VALUE, Condition::Zero, 0), 1);
        assert_eq!(t.branch(Flags::NONE, Condition::Greater, 0), 1);
        assert_eq!(t.branch(Flags::MINUS, Condition::Greater, 0), 0);
        assert_eq!(t.branch(Flags::VALUE, Condition::LessOrEqual, 0), 1);
        assert_eq!(t.branch(Flags::NONE, Condition::Switch3, 0x4), 1);
        assert_eq!(t.branch(Flags::NONE, Condition::Switch3, 0xB), 0);
    }

    #[test]
    fn test_branch_never_conditions() {
        let t = tables();
        for flags in 0..16 {
            for switches in 0..16 {
                assert_eq!(t.branch(Flags::from_bits(flags), Condition::Tm, switches), 0);
                assert_eq!(t.branch(Flags::from_bits(flags), Condition::Ep, switches), 0);
            }
        }
    }

    #[test]
    fn test_condition_nibble_round_trip() {
        for n in 0..16u8 {
            assert_eq!(Condition::from_nibble(n).to_nibble(), n);
        }
    }
}
