//! Disassembler for CPU6 machine code.
//!
//! Converts raw instruction bytes back to readable assembly. Operand
//! bytes are decoded statically, so no CPU state is touched.

use crate::cpu::alu::Width;
use crate::cpu::decode::{decode, AddrMode, IndexUpdate, Indexed, Instruction, UnaryOp};
use crate::cpu::registers::{byte, word_name};

/// Disassemble the instruction at the start of `bytes`, located at `pc`.
///
/// Returns the text and the number of bytes consumed (at least one).
pub fn disassemble_one(bytes: &[u8], pc: u16) -> (String, usize) {
    let Some(&opcode) = bytes.first() else {
        return (String::new(), 0);
    };
    let instr = match decode(opcode) {
        Ok(instr) => instr,
        Err(_) => return (format!("??? ; {:02X}", opcode), 1),
    };

    let mut operands = Operands { bytes, pos: 1, pc };
    match format_instruction(&instr, &mut operands) {
        Some(text) => (text, operands.pos),
        None => (format!("{} ; truncated", instr.mnemonic()), bytes.len()),
    }
}

/// Disassemble a whole image loaded at `origin`.
pub fn disassemble(bytes: &[u8], origin: u16) -> String {
    let mut output = String::new();
    output.push_str("; CPU6 Disassembly\n");
    output.push_str("; ----------------\n\n");

    let mut offset = 0;
    while offset < bytes.len() {
        let pc = origin.wrapping_add(offset as u16);
        let (text, len) = disassemble_one(&bytes[offset..], pc);
        let raw: Vec<String> = bytes[offset..offset + len].iter().map(|b| format!("{:02X}", b)).collect();
        output.push_str(&format!("{:04X}: {:<21} {}\n", pc, raw.join(" "), text));
        offset += len;
    }

    output
}

/// Cursor over the operand bytes that follow an opcode.
struct Operands<'a> {
    bytes: &'a [u8],
    pos: usize,
    pc: u16,
}

impl Operands<'_> {
    fn u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn i8(&mut self) -> Option<i8> {
        self.u8().map(|b| b as i8)
    }

    fn u16(&mut self) -> Option<u16> {
        Some(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    /// Address of the next byte to be consumed.
    fn here(&self) -> u16 {
        self.pc.wrapping_add(self.pos as u16)
    }
}

fn format_instruction(instr: &Instruction, ops: &mut Operands) -> Option<String> {
    let name = instr.mnemonic();
    let text = match *instr {
        // Branch
        Instruction::Branch(_) => {
            let disp = ops.i8()?;
            let target = ops.here().wrapping_add(disp as i16 as u16);
            format!("{} ${:04X}", name, target)
        }

        // Unary ALU
        Instruction::Unary { op, width } => {
            let b = ops.u8()?;
            let (reg, count) = (b >> 4, b & 0xF);
            let reg = reg_name(width, reg);
            let shown = if op == UnaryOp::Invert { 0 } else { count };
            match (op, shown) {
                (_, 0) => format!("{} {}", name, reg),
                (UnaryOp::Clear, value) => format!("{} {}, {}", name, reg, value),
                (_, count) => format!("{} {}, {}", name, reg, count as u16 + 1),
            }
        }
        Instruction::Mmu => {
            let sub = ops.u8()?;
            let name = match sub {
                0x0C => "LDMMU",
                0x1C => "STMMU",
                _ => return Some(format!("MMU ${:02X}", sub)),
            };
            let bank = ops.u8()? & 0x7;
            let addr = ops.u16()?;
            format!("{} {}, (${:04X})", name, bank, addr)
        }
        Instruction::Dma => {
            let b = ops.u8()?;
            let reg = word_name(b >> 4);
            match b & 0xF {
                0x0 => format!("STDMA {}", reg),
                0x1 => format!("LDDMA {}", reg),
                0x2 => format!("STDMAC {}", reg),
                0x3 => format!("LDDMAC {}", reg),
                0x4 => format!("DMAMODE {}", b >> 4),
                0x6 => format!("DMAENABLE {}", reg),
                _ => format!("DMA ${:02X}", b),
            }
        }
        Instruction::Block => {
            let sub = ops.u8()?;
            let name = match sub {
                0x40 => "BCP",
                0x80 => "BCMP",
                _ => return Some(format!("BLK ${:02X}", sub)),
            };
            let len = ops.u8()?;
            let src = ops.u16()?;
            let dst = ops.u16()?;
            format!("{} {}, (${:04X}), (${:04X})", name, len, src, dst)
        }

        // Binary ALU
        Instruction::Binary { width, .. } => {
            let b = ops.u8()?;
            format!("{} {}, {}", name, reg_name(width, b >> 4), reg_name(width, b & 0xF))
        }

        // Load / Store / Jump
        Instruction::Load { width, mode, .. } | Instruction::Store { width, mode, .. } => {
            format!("{} {}", name, format_operand(mode, width, ops)?)
        }
        Instruction::Jump(mode) | Instruction::JumpSubroutine(mode) => {
            format!("{} {}", name, format_operand(mode, Width::Word, ops)?)
        }
        Instruction::Jsys => format!("{} ${:02X}", name, ops.u8()?),
        Instruction::Push | Instruction::Pop => {
            let b = ops.u8()?;
            format!("{} {}, {}", name, byte::name(b >> 4), (b & 0xF) + 1)
        }

        _ => name.to_string(),
    };
    Some(text)
}

fn format_operand(mode: AddrMode, width: Width, ops: &mut Operands) -> Option<String> {
    let text = match mode {
        AddrMode::Literal => match width {
            Width::Byte => format!("#${:02X}", ops.u8()?),
            Width::Word => format!("#${:04X}", ops.u16()?),
        },
        AddrMode::Direct => format!("${:04X}", ops.u16()?),
        AddrMode::Indirect => format!("@${:04X}", ops.u16()?),
        AddrMode::Relative => relative(ops)?,
        AddrMode::RelativeIndirect => format!("@{}", relative(ops)?),
        AddrMode::Indexed => {
            let post = ops.u8()?;
            let Some(ix) = Indexed::from_byte(post) else {
                return Some(format!("?? ${:02X}", post));
            };
            let reg = word_name(ix.reg);
            let base = match ix.update {
                IndexUpdate::None => reg,
                IndexUpdate::PostIncrement => format!("{}+", reg),
                IndexUpdate::PreDecrement => format!("-{}", reg),
            };
            let operand = if ix.displaced {
                format!("{}({})", ops.i8()?, base)
            } else {
                base
            };
            if ix.indirect {
                format!("@{}", operand)
            } else {
                operand
            }
        }
        AddrMode::Register(reg) => format!("({})", reg.name()),
    };
    Some(text)
}

fn relative(ops: &mut Operands) -> Option<String> {
    let disp = ops.i8()?;
    let target = ops.here().wrapping_add(disp as i16 as u16);
    Some(format!("*{:+} (${:04X})", disp, target))
}

fn reg_name(width: Width, index: u8) -> String {
    match width {
        Width::Byte => byte::name(index).to_string(),
        Width::Word => word_name(index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_hlt() {
        assert_eq!(disassemble_one(&[0x00], 0xFC00), ("HLT".to_string(), 1));
    }

    #[test]
    fn test_disassemble_branch_target() {
        let (text, len) = disassemble_one(&[0x1A, 0xFD], 0x01FF);
        assert_eq!(text, "BS1 $01FE");
        assert_eq!(len, 2);
    }

    #[test]
    fn test_disassemble_load_modes() {
        assert_eq!(disassemble_one(&[0x90, 0x12, 0x34], 0).0, "LDA #$1234");
        assert_eq!(disassemble_one(&[0x80, 0x12], 0).0, "LDAB #$12");
        assert_eq!(disassemble_one(&[0xB2, 0x20, 0x00], 0).0, "STA @$2000");
        assert_eq!(disassemble_one(&[0x9A], 0).0, "LDA (X)");
        assert_eq!(disassemble_one(&[0x93, 0xFE], 0x100).0, "LDA *-2 ($0100)");
    }

    #[test]
    fn test_disassemble_indexed() {
        assert_eq!(disassemble_one(&[0x95, 0x41], 0), ("LDA X+".to_string(), 2));
        assert_eq!(disassemble_one(&[0xA5, 0x62], 0).0, "STAB -Y");
        assert_eq!(disassemble_one(&[0xD5, 0x8C, 0xFC], 0), ("LDB @-4(Z)".to_string(), 3));
    }

    #[test]
    fn test_disassemble_register_ops() {
        assert_eq!(disassemble_one(&[0x20, 0x11], 0).0, "INRB AL, 2");
        assert_eq!(disassemble_one(&[0x32, 0x20], 0).0, "CLR B");
        assert_eq!(disassemble_one(&[0x41, 0x13], 0).0, "SUBB AL, BL");
        assert_eq!(disassemble_one(&[0x7E, 0x99], 0).0, "PUSH ZL, 10");
    }

    #[test]
    fn test_disassemble_system_ops() {
        assert_eq!(
            disassemble_one(&[0x2E, 0x0C, 0x03, 0x20, 0x00], 0),
            ("LDMMU 3, ($2000)".to_string(), 5)
        );
        assert_eq!(disassemble_one(&[0x2F, 0x41], 0).0, "LDDMA X");
        assert_eq!(
            disassemble_one(&[0x47, 0x80, 0x04, 0x20, 0x00, 0x21, 0x00], 0),
            ("BCMP 4, ($2000), ($2100)".to_string(), 7)
        );
        assert_eq!(disassemble_one(&[0x66, 0x42], 0).0, "JSYS $42");
    }

    #[test]
    fn test_invalid_and_truncated() {
        assert_eq!(disassemble_one(&[0x96], 0), ("??? ; 96".to_string(), 1));
        let (text, len) = disassemble_one(&[0x90, 0x12], 0);
        assert!(text.contains("truncated"));
        assert_eq!(len, 2);
    }

    #[test]
    fn test_disassemble_listing() {
        let listing = disassemble(&[0x01, 0x90, 0x00, 0x07, 0x00], 0xFC00);
        assert!(listing.contains("FC00: 01"));
        assert!(listing.contains("FC01: 90 00 07"));
        assert!(listing.contains("LDA #$0007"));
        assert!(listing.contains("FC04: 00"));
    }
}
