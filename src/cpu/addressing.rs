//! Effective address resolution.

use crate::cpu::alu::Width;
use crate::cpu::decode::{AddrMode, IndexUpdate, Indexed};
use crate::cpu::execute::{Cpu, CpuError};

impl Cpu {
    /// Resolve the operand address for `mode`, consuming operand bytes
    /// and applying any index register update.
    ///
    /// `width` is the operand size: it sets how far a literal operand
    /// advances the PC and the step of auto-increment and decrement.
    pub fn effective_address(&mut self, mode: AddrMode, width: Width) -> Result<u16, CpuError> {
        let addr = match mode {
            AddrMode::Literal => {
                let addr = self.status.pc;
                self.status.pc = addr.wrapping_add(width.size());
                addr
            }
            AddrMode::Direct => self.fetch_u16(),
            AddrMode::Indirect => {
                let ptr = self.fetch_u16();
                self.read_u16(ptr)
            }
            AddrMode::Relative => self.relative(),
            AddrMode::RelativeIndirect => {
                let ptr = self.relative();
                self.read_u16(ptr)
            }
            AddrMode::Indexed => self.indexed(width)?,
            AddrMode::Register(reg) => self.reg(reg),
        };
        Ok(addr)
    }

    /// PC after the displacement byte, plus the signed displacement.
    fn relative(&mut self) -> u16 {
        let disp = self.fetch_i8();
        self.status.pc.wrapping_add(disp as i16 as u16)
    }

    fn indexed(&mut self, width: Width) -> Result<u16, CpuError> {
        let post = self.fetch_u8();
        let ix = Indexed::from_byte(post).ok_or(CpuError::InvalidIndexMode {
            post,
            pc: self.instruction_pc(),
        })?;
        let disp = if ix.displaced { self.fetch_i8() as i16 as u16 } else { 0 };

        let base = self.reg_u16(ix.reg);
        let addr = match ix.update {
            IndexUpdate::None => base,
            IndexUpdate::PostIncrement => {
                self.set_reg_u16(ix.reg, base.wrapping_add(width.size()));
                base
            }
            IndexUpdate::PreDecrement => {
                let addr = base.wrapping_sub(width.size());
                self.set_reg_u16(ix.reg, addr);
                addr
            }
        };

        let addr = addr.wrapping_add(disp);
        Ok(if ix.indirect { self.read_u16(addr) } else { addr })
    }
}
