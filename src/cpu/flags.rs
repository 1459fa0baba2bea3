//! The CPU6 condition flags.
//!
//! Four bits live in the low nibble of the flag byte:
//! - LINK (bit 0): carry out of additions, rotate-through bit
//! - MINUS (bit 1): sign of the last result
//! - FAULT (bit 2): overflow / error condition
//! - VALUE (bit 3): last result was zero

use serde::{Serialize, Deserialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// The processor flag nibble.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const LINK: Flags = Flags(0x1);
    pub const MINUS: Flags = Flags(0x2);
    pub const FAULT: Flags = Flags(0x4);
    pub const VALUE: Flags = Flags(0x8);
    pub const ALL: Flags = Flags(0xF);

    /// Build from raw bits; anything above the low nibble is dropped.
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits & 0xF)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn set(&mut self, other: Flags, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// `flag` when `on`, otherwise no flags.
    #[inline]
    pub const fn when(flag: Flags, on: bool) -> Flags {
        if on { flag } else { Flags::NONE }
    }

    pub fn link(self) -> bool {
        self.contains(Flags::LINK)
    }

    pub fn minus(self) -> bool {
        self.contains(Flags::MINUS)
    }

    pub fn fault(self) -> bool {
        self.contains(Flags::FAULT)
    }

    pub fn value(self) -> bool {
        self.contains(Flags::VALUE)
    }

    /// Keep the bits in `keep` and replace the rest with `produced`.
    #[inline]
    pub fn merge(self, keep: Flags, produced: Flags) -> Flags {
        (self & keep) | produced
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl Not for Flags {
    type Output = Flags;

    fn not(self) -> Flags {
        Flags(!self.0 & 0xF)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({})", self)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |on: bool, c: char| if on { c } else { '-' };
        write!(
            f,
            "{}{}{}{}",
            mark(self.value(), 'V'),
            mark(self.fault(), 'F'),
            mark(self.minus(), 'M'),
            mark(self.link(), 'L'),
        )
    }
}
