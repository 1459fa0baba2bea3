//! CPU emulation for the Centurion CPU6.
//!
//! This module implements the CPU6 processor:
//! - 16 banks of eight 16-bit registers held in a 256-byte scratchpad
//! - an MMU mapping 16-bit logical addresses onto a 19-bit bus
//! - flags LINK, MINUS, FAULT and VALUE, with table-driven flag logic
//! - 16 interrupt levels, each with its own register bank

pub mod flags;
pub mod alu;
pub mod tables;
pub mod registers;
pub mod mmu;
pub mod decode;
pub mod execute;
mod addressing;

pub use flags::Flags;
pub use alu::Width;
pub use tables::{tables, Condition, Tables};
pub use registers::{Reg, RegisterFile};
pub use mmu::{BankSelect, Mmu, MmuError};
pub use decode::{decode, AddrMode, DecodeError, Instruction};
pub use execute::{Cpu, CpuError, CpuSnapshot, CpuState, Dma, Status};
