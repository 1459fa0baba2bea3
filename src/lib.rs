//! # CPU6 Emulator
//!
//! An emulator of the Centurion CPU6, a 16-bit minicomputer processor of
//! the late 1970s.
//!
//! The CPU sees a 16-bit logical address space. The low 256 bytes are its
//! register scratchpad; everything above goes through an eight-bank MMU onto
//! a 19-bit physical bus shared by memory and I/O cards.

pub mod bus;
pub mod cpu;
pub mod asm;
pub mod devices;
pub mod config;
pub mod machine;

// Re-export commonly used types
pub use bus::{AddressSpace, BusError, Ram, Region, Rom};
pub use cpu::{Cpu, CpuError, CpuSnapshot, CpuState, Flags, Instruction, Reg};
pub use asm::{disassemble, disassemble_one};
pub use devices::{DiagCard, InterruptLine, Mux};
pub use config::{ConfigError, MachineConfig};
pub use machine::{Machine, MachineError, RunSummary};
