//! Opcode decoder for the CPU6.
//!
//! An opcode byte splits into a high nibble selecting one of sixteen groups
//! and a low nibble selecting the operation or addressing mode inside it.
//! Operand bytes that follow the opcode are fetched by the execution engine,
//! since several of them change registers while being resolved.

use crate::cpu::alu::Width;
use crate::cpu::registers::Reg;
use crate::cpu::tables::Condition;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// How a load, store or jump finds its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddrMode {
    /// The operand follows the opcode.
    Literal,
    /// A 16-bit address follows.
    Direct,
    /// A 16-bit address of the address follows.
    Indirect,
    /// `pc + disp8`, taken after the displacement byte.
    Relative,
    RelativeIndirect,
    /// An index byte follows; see [`Indexed`].
    Indexed,
    /// The register holds the address.
    Register(Reg),
}

impl AddrMode {
    /// Decode a mode nibble. Modes 6 and 7 do not exist.
    pub fn from_nibble(opcode: u8, nibble: u8) -> Result<Self, DecodeError> {
        let mode = match nibble & 0xF {
            0 => AddrMode::Literal,
            1 => AddrMode::Direct,
            2 => AddrMode::Indirect,
            3 => AddrMode::Relative,
            4 => AddrMode::RelativeIndirect,
            5 => AddrMode::Indexed,
            n @ 6..=7 => return Err(DecodeError::InvalidAddressingMode { opcode, mode: n }),
            n => AddrMode::Register(Reg::ALL[(n - 8) as usize]),
        };
        Ok(mode)
    }
}

/// Register update performed by an indexed operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexUpdate {
    None,
    /// Use the register, then advance it by the operand size.
    PostIncrement,
    /// Step the register back by the operand size, then use it.
    PreDecrement,
}

/// A decoded index byte: `rrrr dixx` where `r` is the register, `d` adds
/// a displacement byte, `i` makes the access indirect and `xx` picks the
/// update. `xx = 3` is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indexed {
    /// Byte offset of the index register in the current bank.
    pub reg: u8,
    pub update: IndexUpdate,
    pub indirect: bool,
    pub displaced: bool,
}

impl Indexed {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let update = match byte & 0x3 {
            0 => IndexUpdate::None,
            1 => IndexUpdate::PostIncrement,
            2 => IndexUpdate::PreDecrement,
            _ => return None,
        };
        Some(Self {
            reg: byte >> 4,
            update,
            indirect: byte & 0x4 != 0,
            displaced: byte & 0x8 != 0,
        })
    }
}

/// Single-operand ALU operations of groups 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Increment,
    Decrement,
    Clear,
    Invert,
    ShiftRight,
    ShiftLeft,
    RotateRight,
    RotateLeft,
}

impl UnaryOp {
    const ALL: [UnaryOp; 8] = [
        UnaryOp::Increment,
        UnaryOp::Decrement,
        UnaryOp::Clear,
        UnaryOp::Invert,
        UnaryOp::ShiftRight,
        UnaryOp::ShiftLeft,
        UnaryOp::RotateRight,
        UnaryOp::RotateLeft,
    ];
}

/// Two-operand ALU operations of groups 4 and 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    And,
    Or,
    Xor,
    Transfer,
}

impl BinaryOp {
    const ALL: [BinaryOp; 6] = [
        BinaryOp::Add,
        BinaryOp::Subtract,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Xor,
        BinaryOp::Transfer,
    ];
}

/// A decoded opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Control ====================
    Halt,
    Nop,
    SetFault,
    ResetFault,
    EnableInterrupts,
    DisableInterrupts,
    SetLink,
    ResetLink,
    ComplementLink,
    /// PC := X, X := pop
    ReturnFromSubroutine,
    /// Return from interrupt, saving the PC first.
    ReturnFromInterrupt,
    /// Return from interrupt without saving the PC.
    ReturnFromInterruptRestore,
    EnableLinkOut,
    PcToX,
    Delay,
    /// Return through the syscall frame pushed by JSYS.
    ReturnFromSyscall,

    // ==================== Branch ====================
    Branch(Condition),

    // ==================== Unary ALU ====================
    /// Explicit register; a `rrrr cccc` byte follows.
    Unary { op: UnaryOp, width: Width },
    /// On AL or A.
    UnaryImplicit { op: UnaryOp, width: Width },
    IncrementX,
    DecrementX,
    /// LDMMU / STMMU; a sub-opcode follows.
    Mmu,
    /// DMA register access; a `rrrr oooo` byte follows.
    Dma,
    /// BCP / BCMP; a sub-opcode follows.
    Block,

    // ==================== Binary ALU ====================
    /// Explicit registers; a `ssss dddd` byte follows.
    Binary { op: BinaryOp, width: Width },
    /// AL op BL -> BL, or A op B -> B.
    BinaryImplicit { op: BinaryOp, width: Width },
    /// AL or A copied into `to`.
    TransferA { to: Reg, width: Width },

    // ==================== Load / Store ====================
    /// Byte loads target the low half of `reg`.
    Load { reg: Reg, width: Width, mode: AddrMode },
    Store { reg: Reg, width: Width, mode: AddrMode },

    // ==================== Jump / Call ====================
    Jump(AddrMode),
    JumpSubroutine(AddrMode),
    /// Syscall gate entry; an argument byte follows.
    Jsys,
    /// Interrupt at level 15.
    Syscall,
    Push,
    Pop,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid addressing mode {mode} in opcode {opcode:02X}")]
    InvalidAddressingMode { opcode: u8, mode: u8 },
}

/// Decode an opcode byte.
pub fn decode(opcode: u8) -> Result<Instruction, DecodeError> {
    use Instruction::*;

    let group = opcode >> 4;
    let low = opcode & 0xF;

    let instr = match group {
        0x0 => match low {
            0x0 => Halt,
            0x1 => Nop,
            0x2 => SetFault,
            0x3 => ResetFault,
            0x4 => EnableInterrupts,
            0x5 => DisableInterrupts,
            0x6 => SetLink,
            0x7 => ResetLink,
            0x8 => ComplementLink,
            0x9 => ReturnFromSubroutine,
            0xA => ReturnFromInterrupt,
            0xB => ReturnFromInterruptRestore,
            0xC => EnableLinkOut,
            0xD => PcToX,
            0xE => Delay,
            _ => ReturnFromSyscall,
        },
        0x1 => Branch(Condition::from_nibble(low)),
        0x2 | 0x3 => {
            let width = if group == 0x2 { Width::Byte } else { Width::Word };
            match low {
                0x0..=0x7 => Unary { op: UnaryOp::ALL[low as usize], width },
                0x8..=0xD => UnaryImplicit { op: UnaryOp::ALL[(low - 8) as usize], width },
                0xE if group == 0x2 => Mmu,
                0xF if group == 0x2 => Dma,
                0xE => IncrementX,
                _ => DecrementX,
            }
        }
        0x4 | 0x5 => {
            let width = if group == 0x4 { Width::Byte } else { Width::Word };
            match low {
                0x0..=0x5 => Binary { op: BinaryOp::ALL[low as usize], width },
                0x7 if group == 0x4 => Block,
                0x8 => BinaryImplicit { op: BinaryOp::Add, width },
                0x9 => BinaryImplicit { op: BinaryOp::Subtract, width },
                0xA => BinaryImplicit { op: BinaryOp::And, width },
                0xB => TransferA { to: Reg::X, width },
                0xC => TransferA { to: Reg::Y, width },
                0xD => TransferA { to: Reg::B, width },
                0xE if group == 0x5 => TransferA { to: Reg::Z, width },
                0xF if group == 0x5 => TransferA { to: Reg::S, width },
                _ => Nop,
            }
        }
        0x6 => match low {
            0x6 => Jsys,
            0x0..=0x7 => Load { reg: Reg::X, width: Width::Word, mode: AddrMode::from_nibble(opcode, low)? },
            _ => Store { reg: Reg::X, width: Width::Word, mode: AddrMode::from_nibble(opcode, low & 0x7)? },
        },
        0x7 => match low {
            0x6 => Syscall,
            0xE => Push,
            0xF => Pop,
            0x0..=0x7 => Jump(AddrMode::from_nibble(opcode, low)?),
            _ => JumpSubroutine(AddrMode::from_nibble(opcode, low & 0x7)?),
        },
        _ => {
            let mode = AddrMode::from_nibble(opcode, low)?;
            let (reg, width) = match group {
                0x8 | 0xA => (Reg::A, Width::Byte),
                0x9 | 0xB => (Reg::A, Width::Word),
                0xC | 0xE => (Reg::B, Width::Byte),
                _ => (Reg::B, Width::Word),
            };
            if group & 0x2 == 0 {
                Load { reg, width, mode }
            } else {
                Store { reg, width, mode }
            }
        }
    };
    Ok(instr)
}

impl Instruction {
    /// Assembler mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        use Instruction::*;

        match *self {
            Halt => "HLT",
            Nop => "NOP",
            SetFault => "SF",
            ResetFault => "RF",
            EnableInterrupts => "EI",
            DisableInterrupts => "DI",
            SetLink => "SL",
            ResetLink => "RL",
            ComplementLink => "CL",
            ReturnFromSubroutine => "RSR",
            ReturnFromInterrupt => "RI",
            ReturnFromInterruptRestore => "RIM",
            EnableLinkOut => "ELO",
            PcToX => "PCX",
            Delay => "DLY",
            ReturnFromSyscall => "RSYS",
            Branch(cond) => cond.mnemonic(),
            Unary { op, width } => {
                let names = ["INR", "DCR", "CLR", "IVR", "SRR", "SLR", "RRR", "RLR"];
                let byte = ["INRB", "DCRB", "CLRB", "IVRB", "SRRB", "SLRB", "RRRB", "RLRB"];
                pick(width, &names, &byte, op as usize)
            }
            UnaryImplicit { op, width } => {
                let names = ["INA", "DCA", "CLA", "IVA", "SRA", "SLA", "RRA", "RLA"];
                let byte = ["INAB", "DCAB", "CLAB", "IVAB", "SRAB", "SLAB", "RRAB", "RLAB"];
                pick(width, &names, &byte, op as usize)
            }
            IncrementX => "INX",
            DecrementX => "DCX",
            Mmu => "MMU",
            Dma => "DMA",
            Block => "BLK",
            Binary { op, width } => {
                let names = ["ADD", "SUB", "AND", "ORI", "ORE", "XFR"];
                let byte = ["ADDB", "SUBB", "ANDB", "ORIB", "OREB", "XFRB"];
                pick(width, &names, &byte, op as usize)
            }
            BinaryImplicit { op, width } => {
                let names = ["AAB", "SAB", "NAB", "", "", ""];
                let byte = ["AABB", "SABB", "NABB", "", "", ""];
                pick(width, &names, &byte, op as usize)
            }
            TransferA { to, width } => match (to, width) {
                (Reg::X, Width::Byte) => "XAXB",
                (Reg::Y, Width::Byte) => "XAYB",
                (Reg::B, Width::Byte) => "XABB",
                (Reg::X, _) => "XAX",
                (Reg::Y, _) => "XAY",
                (Reg::B, _) => "XAB",
                (Reg::Z, _) => "XAZ",
                _ => "XAS",
            },
            Load { reg, width, .. } => match (reg, width) {
                (Reg::A, Width::Byte) => "LDAB",
                (Reg::A, _) => "LDA",
                (Reg::B, Width::Byte) => "LDBB",
                (Reg::B, _) => "LDB",
                _ => "LDX",
            },
            Store { reg, width, .. } => match (reg, width) {
                (Reg::A, Width::Byte) => "STAB",
                (Reg::A, _) => "STA",
                (Reg::B, Width::Byte) => "STBB",
                (Reg::B, _) => "STB",
                _ => "STX",
            },
            Jump(_) => "JMP",
            JumpSubroutine(_) => "JSR",
            Jsys => "JSYS",
            Syscall => "SYSCALL",
            Push => "PUSH",
            Pop => "POP",
        }
    }
}

fn pick(width: Width, word: &[&'static str], byte: &[&'static str], index: usize) -> &'static str {
    match width {
        Width::Byte => byte[index],
        Width::Word => word[index],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_opcode_decodes_or_reports_mode() {
        for opcode in 0..=0xFFu8 {
            match decode(opcode) {
                Ok(instr) => assert!(!instr.mnemonic().is_empty(), "{:02X}", opcode),
                Err(DecodeError::InvalidAddressingMode { mode, .. }) => assert!(mode == 6 || mode == 7),
            }
        }
    }

    #[test]
    fn test_invalid_modes() {
        assert!(decode(0x96).is_err());
        assert!(decode(0x97).is_err());
        assert!(decode(0x67).is_err());
        assert!(decode(0x6E).is_err());
        assert!(decode(0x77).is_err());
        assert_eq!(decode(0x66), Ok(Instruction::Jsys));
        assert_eq!(decode(0x76), Ok(Instruction::Syscall));
    }

    #[test]
    fn test_group_layout() {
        assert_eq!(decode(0x00), Ok(Instruction::Halt));
        assert_eq!(decode(0x14), Ok(Instruction::Branch(Condition::Zero)));
        assert_eq!(decode(0x2E), Ok(Instruction::Mmu));
        assert_eq!(decode(0x2F), Ok(Instruction::Dma));
        assert_eq!(decode(0x3E), Ok(Instruction::IncrementX));
        assert_eq!(decode(0x47), Ok(Instruction::Block));
        assert_eq!(decode(0x46), Ok(Instruction::Nop));
        assert_eq!(decode(0x57), Ok(Instruction::Nop));
        assert_eq!(decode(0x7E), Ok(Instruction::Push));
        assert_eq!(
            decode(0x2C),
            Ok(Instruction::UnaryImplicit { op: UnaryOp::ShiftRight, width: Width::Byte })
        );
        assert_eq!(
            decode(0x5F),
            Ok(Instruction::TransferA { to: Reg::S, width: Width::Word })
        );
    }

    #[test]
    fn test_load_store_groups() {
        assert_eq!(
            decode(0x90),
            Ok(Instruction::Load { reg: Reg::A, width: Width::Word, mode: AddrMode::Literal })
        );
        assert_eq!(
            decode(0xE5),
            Ok(Instruction::Store { reg: Reg::B, width: Width::Byte, mode: AddrMode::Indexed })
        );
        assert_eq!(
            decode(0x6A),
            Ok(Instruction::Store { reg: Reg::X, width: Width::Word, mode: AddrMode::Indirect })
        );
        assert_eq!(
            decode(0xBC),
            Ok(Instruction::Store { reg: Reg::A, width: Width::Word, mode: AddrMode::Register(Reg::Z) })
        );
        assert_eq!(
            decode(0x79),
            Ok(Instruction::JumpSubroutine(AddrMode::Direct))
        );
    }

    #[test]
    fn test_indexed_byte() {
        let ix = Indexed::from_byte(0x2D).unwrap();
        assert_eq!(ix.reg, 2);
        assert_eq!(ix.update, IndexUpdate::PostIncrement);
        assert!(ix.indirect);
        assert!(ix.displaced);
        for reserved in [0x03, 0x07, 0x0B, 0x0F] {
            assert!(Indexed::from_byte(reserved).is_none());
        }
    }
}
