//! Tooling for CPU6 machine code.

pub mod disasm;

pub use disasm::{disassemble, disassemble_one};
