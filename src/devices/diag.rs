//! Diagnostic card: front-panel sense switches and a two-digit hex display.

use crate::bus::Region;
use std::fmt;
use tracing::info;

/// Default base address of the diagnostic card.
pub const DIAG_BASE: u32 = 0x3F106;

/// Bytes reserved by the diagnostic card.
pub const DIAG_LEN: u32 = 0x0F;

/// Offset of the switch register and of the digit latch.
const DIGITS: u32 = 0xA;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagCard {
    switches: u8,
    digits: [u8; 2],
    blank: bool,
    dots: [bool; 4],
}

impl DiagCard {
    pub fn new(switches: u8) -> Self {
        Self {
            switches,
            digits: [0, 0],
            blank: true,
            dots: [false; 4],
        }
    }

    pub fn switches(&self) -> u8 {
        self.switches
    }

    pub fn set_switches(&mut self, switches: u8) {
        self.switches = switches;
    }

    /// Upper and lower hex digit.
    pub fn digits(&self) -> [u8; 2] {
        self.digits
    }

    pub fn is_blank(&self) -> bool {
        self.blank
    }

    pub fn dots(&self) -> [bool; 4] {
        self.dots
    }
}

impl Region for DiagCard {
    fn read_u8(&mut self, offset: u32) -> u8 {
        if offset == DIGITS {
            self.switches
        } else {
            0
        }
    }

    /// Writes to the digit latch load both digits. Any other offset is a
    /// set/clear pair: odd turns the element on, and `offset >> 1` picks
    /// blanking (0) or one of the four dots (1-4).
    fn write_u8(&mut self, offset: u32, value: u8) {
        if offset == DIGITS {
            self.digits = [value >> 4, value & 0xF];
        } else {
            let on = offset & 1 == 1;
            match offset >> 1 {
                0 => self.blank = on,
                n @ 1..=4 => self.dots[n as usize - 1] = on,
                _ => {}
            }
        }
        info!("hex display {}", self);
    }
}

impl fmt::Display for DiagCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blank {
            return write!(f, "[      ]");
        }
        let dot = |on: bool| if on { '*' } else { '.' };
        write!(
            f,
            "[{}{:X}{}{}{:X}{}]",
            dot(self.dots[0]),
            self.digits[0],
            dot(self.dots[1]),
            dot(self.dots[2]),
            self.digits[1],
            dot(self.dots[3]),
        )
    }
}
