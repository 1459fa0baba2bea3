//! Arithmetic and flag computation for the CPU6.
//!
//! Every function here is pure: it takes operand bits and returns the
//! result together with the flags the operation *produces*. Which of the
//! previous flags survive is decided by the caller through the `*_KEEP`
//! masks, because the hardware is not uniform about it.

use crate::cpu::flags::Flags;
use serde::{Serialize, Deserialize};

/// Operand width of an ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            Width::Byte => 8,
            Width::Word => 16,
        }
    }

    #[inline]
    pub const fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
        }
    }

    #[inline]
    pub const fn sign_bit(self) -> u32 {
        match self {
            Width::Byte => 0x80,
            Width::Word => 0x8000,
        }
    }

    /// Size in bytes, used as the step of auto-increment addressing.
    #[inline]
    pub const fn size(self) -> u16 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
        }
    }

    #[inline]
    pub fn sign_extend(self, value: u16) -> i32 {
        match self {
            Width::Byte => value as u8 as i8 as i32,
            Width::Word => value as i16 as i32,
        }
    }
}

/// Flags left alone by logic, transfer, clear and invert operations.
pub const LOGIC_KEEP: Flags = Flags::from_bits(Flags::LINK.bits() | Flags::FAULT.bits());
/// Flags left alone by increment and decrement.
pub const COUNT_KEEP: Flags = LOGIC_KEEP;
pub const SHIFT_RIGHT_KEEP: Flags = Flags::FAULT;
pub const SHIFT_LEFT_KEEP: Flags = Flags::NONE;
pub const ROTATE_RIGHT_KEEP: Flags = Flags::FAULT;
/// Byte rotate-left ORs its FAULT into the old one instead of replacing it.
pub const ROTATE_LEFT_BYTE_KEEP: Flags = Flags::FAULT;
pub const ROTATE_LEFT_WORD_KEEP: Flags = Flags::NONE;

/// Which comparison the subtract overflow test uses on the result.
///
/// The word register-to-register SUB tests `result < 0`; SUBB, SAB and
/// SABB test `result <= 0`. Both are kept as the hardware behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultRule {
    Negative,
    NonPositive,
}

/// MINUS and VALUE for a result.
#[inline]
pub fn logic_flags(width: Width, value: u32) -> Flags {
    let value = value & width.mask();
    Flags::when(Flags::MINUS, value & width.sign_bit() != 0) | Flags::when(Flags::VALUE, value == 0)
}

/// `s + d`. LINK is the carry out; FAULT is never set.
pub fn add(width: Width, s: u16, d: u16) -> (u16, Flags) {
    let result = s as u32 + d as u32;
    let flags = logic_flags(width, result) | Flags::when(Flags::LINK, result > width.mask());
    ((result & width.mask()) as u16, flags)
}

/// `s - d` on the sign-extended operands.
///
/// LINK is set when `d <= s` compared as unsigned 16-bit values of the
/// sign-extended operands. FAULT follows `(s < 0) != (d < 0 && test(result))`.
pub fn subtract(width: Width, s: u16, d: u16, rule: FaultRule) -> (u16, Flags) {
    let sv = width.sign_extend(s);
    let dv = width.sign_extend(d);
    let result = sv - dv;

    let tested = match rule {
        FaultRule::Negative => result < 0,
        FaultRule::NonPositive => result <= 0,
    };
    let fault = (sv < 0) != (dv < 0 && tested);
    let link = (dv as u32 & 0xFFFF) <= (sv as u32 & 0xFFFF);

    let bits = result as u32 & width.mask();
    let flags = logic_flags(width, bits) | Flags::when(Flags::FAULT, fault) | Flags::when(Flags::LINK, link);
    (bits as u16, flags)
}

/// `value + amount`, wrapping. Only MINUS and VALUE are produced.
pub fn increment(width: Width, value: u16, amount: u16) -> (u16, Flags) {
    let result = (value as u32 + amount as u32) & width.mask();
    (result as u16, logic_flags(width, result))
}

pub fn decrement(width: Width, value: u16, amount: u16) -> (u16, Flags) {
    let result = (value as u32).wrapping_sub(amount as u32) & width.mask();
    (result as u16, logic_flags(width, result))
}

/// Arithmetic shift right by `count + 1` bits.
///
/// LINK receives the last bit shifted out.
pub fn shift_right(width: Width, value: u16, count: u8) -> (u16, Flags) {
    let shifted = width.sign_extend(value) >> count.min(31);
    let result = shifted >> 1;

    let flags = Flags::when(Flags::MINUS, result < 0)
        | Flags::when(Flags::VALUE, result == 0)
        | Flags::when(Flags::LINK, shifted & 1 != 0);
    ((result as u32 & width.mask()) as u16, flags)
}

/// Shift left by `count + 1` bits.
///
/// LINK receives the sign before the final one-bit shift; FAULT is set
/// when that final shift changes the sign.
pub fn shift_left(width: Width, value: u16, count: u8) -> (u16, Flags) {
    let mask = width.mask();
    let sign = width.sign_bit();
    let before = ((value as u32) << count.min(16)) & mask;
    let result = (before << 1) & mask;

    let flags = Flags::when(Flags::MINUS, result & sign != 0)
        | Flags::when(Flags::VALUE, result == 0)
        | Flags::when(Flags::LINK, before & sign != 0)
        | Flags::when(Flags::FAULT, (result & sign) != (before & sign));
    (result as u16, flags)
}

/// Rotate right through LINK by `count + 1` bits.
///
/// The rotation runs over `width + 1` bits, so byte rotates wrap every
/// nine positions.
pub fn rotate_right(width: Width, value: u16, count: u8, link: bool) -> (u16, Flags) {
    let span = width.bits() + 1;
    let carry = 1u32 << width.bits();
    let full = (carry << 1) - 1;
    let reg = (value as u32 & width.mask()) | if link { carry } else { 0 };
    let n = (count as u32 + 1) % span;

    let rotated = ((reg >> n) | (reg << (span - n))) & full;
    (
        (rotated & width.mask()) as u16,
        rotate_flags(width, rotated),
    )
}

/// Rotate left through LINK by `count + 1` bits.
///
/// FAULT is set when the two top bits of the result differ.
pub fn rotate_left(width: Width, value: u16, count: u8, link: bool) -> (u16, Flags) {
    let span = width.bits() + 1;
    let carry = 1u32 << width.bits();
    let full = (carry << 1) - 1;
    let reg = (value as u32 & width.mask()) | if link { carry } else { 0 };
    let n = (count as u32 + 1) % span;

    let rotated = ((reg << n) | (reg >> (span - n))) & full;
    let fault = ((rotated >> 1) ^ rotated) & width.sign_bit() != 0;
    (
        (rotated & width.mask()) as u16,
        rotate_flags(width, rotated) | Flags::when(Flags::FAULT, fault),
    )
}

fn rotate_flags(width: Width, rotated: u32) -> Flags {
    Flags::when(Flags::MINUS, rotated & width.sign_bit() != 0)
        | Flags::when(Flags::VALUE, rotated & width.mask() == 0)
        | Flags::when(Flags::LINK, rotated & (1 << width.bits()) != 0)
}
