//! Memory management unit.
//!
//! Eight banks of 32 page-table entries translate a 16-bit logical address
//! into the 19-bit physical bus: bits 11-15 pick the entry, the entry is
//! the physical page, and the low 11 bits pass through.

use serde::{Serialize, Deserialize};
use thiserror::Error;

pub const BANKS: usize = 8;
pub const PAGES_PER_BANK: usize = 32;
pub const PAGE_SHIFT: u32 = 11;
pub const PAGE_MASK: u16 = 0x7FF;

/// Physical pages hard-wired into the last two entries of every bank at reset.
pub const VECTOR_PAGES: [u8; 2] = [0x7E, 0x7F];

/// How the translating bank is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BankSelect {
    /// An independent bank register, switched by JSYS and RSYS.
    #[default]
    Explicit,
    /// The low three bits of the interrupt level.
    Ipl,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MmuError {
    #[error("MMU bank {0} out of range (0-7)")]
    InvalidBank(u8),
}

/// The page tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mmu {
    table: Vec<u8>,
}

impl Mmu {
    /// Create page tables in their reset state.
    pub fn new() -> Self {
        let mut mmu = Self { table: vec![0; BANKS * PAGES_PER_BANK] };
        mmu.reset();
        mmu
    }

    /// Pages 0-29 map to themselves in every bank; 30 and 31 map to the
    /// vector pages.
    pub fn reset(&mut self) {
        for bank in self.table.chunks_mut(PAGES_PER_BANK) {
            for (page, entry) in bank.iter_mut().enumerate() {
                *entry = match page {
                    30 => VECTOR_PAGES[0],
                    31 => VECTOR_PAGES[1],
                    _ => page as u8,
                };
            }
        }
    }

    /// Physical address of `logical` through `bank`.
    #[inline]
    pub fn translate(&self, logical: u16, bank: u8) -> u32 {
        let entry = (bank as usize & (BANKS - 1)) * PAGES_PER_BANK + (logical >> PAGE_SHIFT) as usize;
        (self.table[entry] as u32) << PAGE_SHIFT | (logical & PAGE_MASK) as u32
    }

    pub fn entry(&self, bank: u8, page: u8) -> Result<u8, MmuError> {
        let index = Self::index(bank, page)?;
        Ok(self.table[index])
    }

    pub fn set_entry(&mut self, bank: u8, page: u8, value: u8) -> Result<(), MmuError> {
        let index = Self::index(bank, page)?;
        self.table[index] = value;
        Ok(())
    }

    /// The 32 entries of one bank.
    pub fn bank(&self, bank: u8) -> Result<&[u8], MmuError> {
        let start = Self::index(bank, 0)?;
        Ok(&self.table[start..start + PAGES_PER_BANK])
    }

    fn index(bank: u8, page: u8) -> Result<usize, MmuError> {
        if bank as usize >= BANKS {
            return Err(MmuError::InvalidBank(bank));
        }
        Ok(bank as usize * PAGES_PER_BANK + (page as usize % PAGES_PER_BANK))
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}
