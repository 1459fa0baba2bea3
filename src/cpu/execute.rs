//! CPU execution engine for the CPU6.
//!
//! Implements the fetch-decode-execute cycle, every instruction behavior,
//! the banked stack and the interrupt context switch.

use crate::bus::AddressSpace;
use crate::cpu::alu::{self, FaultRule, Width};
use crate::cpu::decode::{self, BinaryOp, DecodeError, Instruction, UnaryOp};
use crate::cpu::flags::Flags;
use crate::cpu::mmu::{BankSelect, Mmu, MmuError, PAGES_PER_BANK};
use crate::cpu::registers::{byte, Reg, RegisterFile, SRAM_SIZE};
use crate::cpu::tables::{tables, Tables};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn, Level};

/// Where the program counter points after reset.
pub const RESET_VECTOR: u16 = 0xFC00;

/// Entry point of the syscall gate.
pub const SYSCALL_ENTRY: u16 = 0x0100;

/// Interrupt level raised by the SYSCALL instruction.
pub const SYSCALL_LEVEL: u8 = 15;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HLT); an accepted interrupt resumes it.
    Halted,
    /// CPU hit a fatal decode error.
    Error,
}

/// DMA channel registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dma {
    pub addr: u16,
    pub count: u16,
    pub enabled: bool,
    pub mode: u8,
}

/// Processor status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub pc: u16,
    pub flags: Flags,
    /// Interrupt level 0-15, also the visible register bank.
    pub ipl: u8,
    /// MMU bank register 0-7.
    pub mmu_bank: u8,
    pub interrupt_enable: bool,
    pub halted: bool,
    pub dma: Dma,
}

/// Serializable copy of the processor state, without the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub state: CpuState,
    pub status: Status,
    pub switches: u8,
    pub opcount: u64,
    pub sram: RegisterFile,
    pub mmu: Mmu,
}

/// The CPU6 processor.
pub struct Cpu {
    /// Processor status.
    pub status: Status,
    /// Register scratchpad.
    pub regs: RegisterFile,
    /// Page tables.
    pub mmu: Mmu,
    /// Physical address space.
    pub mem: AddressSpace,
    /// Front-panel sense switches, tested by BS1-BS4.
    pub switches: u8,
    /// Instructions executed since reset.
    pub opcount: u64,
    bank_select: BankSelect,
    reset_vector: u16,
    faulted: bool,
    /// Address of the opcode being executed.
    instr_pc: u16,
    tables: &'static Tables,
}

impl Cpu {
    /// Create a CPU with an empty address space.
    pub fn new() -> Self {
        Self::with_memory(AddressSpace::new())
    }

    /// Create a CPU on `mem`, in its reset state.
    pub fn with_memory(mem: AddressSpace) -> Self {
        let mut cpu = Self {
            status: Status::default(),
            regs: RegisterFile::new(),
            mmu: Mmu::new(),
            mem,
            switches: 0,
            opcount: 0,
            bank_select: BankSelect::Explicit,
            reset_vector: RESET_VECTOR,
            faulted: false,
            instr_pc: 0,
            tables: tables(),
        };
        cpu.reset();
        cpu
    }

    pub fn set_reset_vector(&mut self, vector: u16) {
        self.reset_vector = vector;
    }

    pub fn set_bank_select(&mut self, select: BankSelect) {
        self.bank_select = select;
    }

    pub fn bank_select(&self) -> BankSelect {
        self.bank_select
    }

    /// Reset status, registers and page tables. Memory is untouched.
    pub fn reset(&mut self) {
        self.status = Status {
            pc: self.reset_vector,
            ..Status::default()
        };
        self.regs.reset();
        self.mmu.reset();
        self.opcount = 0;
        self.faulted = false;
        self.instr_pc = self.reset_vector;
    }

    pub fn state(&self) -> CpuState {
        if self.faulted {
            CpuState::Error
        } else if self.status.halted {
            CpuState::Halted
        } else {
            CpuState::Running
        }
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state() == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state() == CpuState::Running
    }

    /// Execute a single instruction.
    ///
    /// Returns `Ok(true)` when an instruction ran and the CPU is still
    /// running, `Ok(false)` when there is nothing to do: the CPU is halted
    /// (also right after HLT).
    pub fn step(&mut self) -> Result<bool, CpuError> {
        if self.faulted {
            return Err(CpuError::NotRunning(CpuState::Error));
        }
        if self.status.halted {
            return Ok(false);
        }

        // Fetch
        self.instr_pc = self.status.pc;
        let opcode = self.fetch_u8();

        // Decode and execute
        let pc = self.instr_pc;
        let executed = match decode::decode(opcode) {
            Ok(instr) => self.execute(instr).map(|()| instr),
            Err(source) => Err(CpuError::Decode { pc, source }),
        };

        let instr = match executed {
            Ok(instr) => instr,
            Err(e) => {
                self.faulted = true;
                tracing::error!("CPU stopped: {}", e);
                return Err(e);
            }
        };
        self.opcount += 1;

        if tracing::enabled!(Level::TRACE) {
            trace!(
                "{:04X}: {:02X} {:<7} A={:04X} B={:04X} X={:04X} S={:04X} flags={} ipl={}",
                self.instr_pc,
                opcode,
                instr.mnemonic(),
                self.reg(Reg::A),
                self.reg(Reg::B),
                self.reg(Reg::X),
                self.reg(Reg::S),
                self.status.flags,
                self.status.ipl,
            );
        }

        Ok(!self.status.halted)
    }

    /// Run until halt, error, or `max_steps` instructions.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self, max_steps: u64) -> Result<u64, CpuError> {
        let start = self.opcount;
        while self.opcount - start < max_steps {
            if !self.step()? && self.status.halted {
                break;
            }
        }
        Ok(self.opcount - start)
    }

    /// Request an interrupt at `level`.
    ///
    /// Accepted only when interrupts are enabled and `level` is above the
    /// current level. On entry the old level's P and C receive the PC and
    /// flags, the level switches, the new bank's C records the old level,
    /// and flags and PC are loaded from the new bank's C and P.
    pub fn trigger_interrupt(&mut self, level: u8) -> bool {
        if level > 0xF {
            warn!("interrupt level {} out of range ignored", level);
            return false;
        }
        if !self.status.interrupt_enable || level <= self.status.ipl {
            return false;
        }

        let prev = self.status.ipl;
        self.set_reg(Reg::P, self.status.pc);
        let c = self.reg(Reg::C);
        self.set_reg(Reg::C, (c & 0x0FFF) | (self.status.flags.bits() as u16) << 12);

        self.status.ipl = level;

        let c = (self.reg(Reg::C) & 0xFF0F) | (prev as u16) << 4;
        self.set_reg(Reg::C, c);
        self.status.flags = Flags::from_bits((c >> 12) as u8);
        self.status.pc = self.reg(Reg::P);
        self.status.halted = false;

        debug!("interrupt {} -> {} entered at {:04X}", prev, level, self.status.pc);
        true
    }

    /// Current MMU bank register.
    pub fn mmu_bank(&self) -> u8 {
        self.status.mmu_bank
    }

    pub fn set_mmu_bank(&mut self, bank: u8) {
        self.status.mmu_bank = bank & 0x7;
    }

    /// Bank used for translation right now.
    pub fn translation_bank(&self) -> u8 {
        match self.bank_select {
            BankSelect::Explicit => self.status.mmu_bank,
            BankSelect::Ipl => self.status.ipl & 0x7,
        }
    }

    /// Physical address of a logical address at or above 0x100.
    pub fn translate(&self, addr: u16) -> u32 {
        self.mmu.translate(addr, self.translation_bank())
    }

    // ==================== Logical memory ====================

    pub fn read_u8(&mut self, addr: u16) -> u8 {
        if (addr as usize) < SRAM_SIZE {
            self.regs.read_u8(addr as u8)
        } else {
            let phys = self.translate(addr);
            self.mem.read_u8(phys)
        }
    }

    pub fn read_i8(&mut self, addr: u16) -> i8 {
        self.read_u8(addr) as i8
    }

    pub fn read_u16(&mut self, addr: u16) -> u16 {
        if (addr as usize) < SRAM_SIZE {
            self.regs.read_u16(addr as u8)
        } else {
            let phys = self.translate(addr);
            self.mem.read_u16(phys)
        }
    }

    pub fn write_u8(&mut self, addr: u16, value: u8) {
        if (addr as usize) < SRAM_SIZE {
            self.regs.write_u8(addr as u8, value);
        } else {
            let phys = self.translate(addr);
            self.mem.write_u8(phys, value);
        }
    }

    pub fn write_u16(&mut self, addr: u16, value: u16) {
        if (addr as usize) < SRAM_SIZE {
            self.regs.write_u16(addr as u8, value);
        } else {
            let phys = self.translate(addr);
            self.mem.write_u16(phys, value);
        }
    }

    /// Copy `data` into logical memory at `addr`.
    pub fn load(&mut self, addr: u16, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u16), b);
        }
    }

    // ==================== Registers ====================

    /// Word register of the current bank.
    pub fn reg(&self, reg: Reg) -> u16 {
        self.regs.get(self.status.ipl, reg)
    }

    pub fn set_reg(&mut self, reg: Reg, value: u16) {
        self.regs.set(self.status.ipl, reg, value);
    }

    pub(crate) fn reg_u8(&self, index: u8) -> u8 {
        self.regs.get_u8(self.status.ipl, index)
    }

    pub(crate) fn set_reg_u8(&mut self, index: u8, value: u8) {
        self.regs.set_u8(self.status.ipl, index, value);
    }

    pub(crate) fn reg_u16(&self, index: u8) -> u16 {
        self.regs.get_u16(self.status.ipl, index)
    }

    pub(crate) fn set_reg_u16(&mut self, index: u8, value: u16) {
        self.regs.set_u16(self.status.ipl, index, value);
    }

    fn reg_sized(&self, width: Width, index: u8) -> u16 {
        match width {
            Width::Byte => self.reg_u8(index) as u16,
            Width::Word => self.reg_u16(index),
        }
    }

    fn set_reg_sized(&mut self, width: Width, index: u8, value: u16) {
        match width {
            Width::Byte => self.set_reg_u8(index, value as u8),
            Width::Word => self.set_reg_u16(index, value),
        }
    }

    fn read_sized(&mut self, width: Width, addr: u16) -> u16 {
        match width {
            Width::Byte => self.read_u8(addr) as u16,
            Width::Word => self.read_u16(addr),
        }
    }

    fn write_sized(&mut self, width: Width, addr: u16, value: u16) {
        match width {
            Width::Byte => self.write_u8(addr, value as u8),
            Width::Word => self.write_u16(addr, value),
        }
    }

    /// Offset of the register a load or store uses: the low half for bytes.
    fn target_index(reg: Reg, width: Width) -> u8 {
        match width {
            Width::Byte => reg.index() + 1,
            Width::Word => reg.index(),
        }
    }

    fn logic(&self, width: Width, value: u16) -> Flags {
        match width {
            Width::Byte => self.tables.logic_byte(value as u8),
            Width::Word => self.tables.logic_word(value),
        }
    }

    /// Replace MINUS and VALUE from `value`, keeping LINK and FAULT.
    fn set_logic_flags(&mut self, width: Width, value: u16) {
        let produced = self.logic(width, value);
        self.status.flags = self.status.flags.merge(alu::LOGIC_KEEP, produced);
    }

    // ==================== Fetch ====================

    pub(crate) fn fetch_u8(&mut self) -> u8 {
        let value = self.read_u8(self.status.pc);
        self.status.pc = self.status.pc.wrapping_add(1);
        value
    }

    pub(crate) fn fetch_i8(&mut self) -> i8 {
        self.fetch_u8() as i8
    }

    pub(crate) fn fetch_u16(&mut self) -> u16 {
        let value = self.read_u16(self.status.pc);
        self.status.pc = self.status.pc.wrapping_add(2);
        value
    }

    /// Fetch a register-pair byte as (high nibble, low nibble).
    fn fetch_nibbles(&mut self) -> (u8, u8) {
        let b = self.fetch_u8();
        (b >> 4, b & 0xF)
    }

    // ==================== Stack ====================

    pub fn push_u8(&mut self, value: u8) {
        let sp = self.reg(Reg::S).wrapping_sub(1);
        self.write_u8(sp, value);
        self.set_reg(Reg::S, sp);
    }

    pub fn push_u16(&mut self, value: u16) {
        let sp = self.reg(Reg::S).wrapping_sub(2);
        self.write_u16(sp, value);
        self.set_reg(Reg::S, sp);
    }

    pub fn pop_u8(&mut self) -> u8 {
        let sp = self.reg(Reg::S);
        let value = self.read_u8(sp);
        self.set_reg(Reg::S, sp.wrapping_add(1));
        value
    }

    pub fn pop_u16(&mut self) -> u16 {
        let sp = self.reg(Reg::S);
        let value = self.read_u16(sp);
        self.set_reg(Reg::S, sp.wrapping_add(2));
        value
    }

    // ==================== Execute ====================

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction) -> Result<(), CpuError> {
        match instr {
            // ==================== Control ====================

            Instruction::Halt => {
                self.set_reg(Reg::P, self.status.pc);
                self.status.halted = true;
                info!("CPU halted at {:04X}", self.instr_pc);
            }

            Instruction::Nop | Instruction::EnableLinkOut | Instruction::Delay => {}

            Instruction::SetFault => self.status.flags.set(Flags::FAULT, true),
            Instruction::ResetFault => self.status.flags.set(Flags::FAULT, false),
            Instruction::EnableInterrupts => self.status.interrupt_enable = true,
            Instruction::DisableInterrupts => self.status.interrupt_enable = false,
            Instruction::SetLink => self.status.flags.set(Flags::LINK, true),
            Instruction::ResetLink => self.status.flags.set(Flags::LINK, false),
            Instruction::ComplementLink => {
                let link = self.status.flags.link();
                self.status.flags.set(Flags::LINK, !link);
            }

            Instruction::ReturnFromSubroutine => {
                self.status.pc = self.reg(Reg::X);
                let x = self.pop_u16();
                self.set_reg(Reg::X, x);
            }

            Instruction::ReturnFromInterrupt => {
                self.set_reg(Reg::P, self.status.pc);
                self.return_from_interrupt();
            }

            Instruction::ReturnFromInterruptRestore => self.return_from_interrupt(),

            Instruction::PcToX => self.set_reg(Reg::X, self.status.pc),

            Instruction::ReturnFromSyscall => {
                let _argument = self.pop_u8();
                let new_x = self.pop_u16();
                let new_ipl = self.pop_u8();
                let new_bank = self.pop_u8();
                let target = self.reg(Reg::X);

                self.set_mmu_bank(new_bank);
                self.status.ipl = new_ipl & 0xF;
                self.set_reg(Reg::X, new_x);
                self.status.pc = target;
                debug!("syscall return to {:04X} (ipl {}, bank {})", target, self.status.ipl, self.status.mmu_bank);
            }

            // ==================== Branch ====================

            Instruction::Branch(cond) => {
                let disp = self.fetch_i8() as i16 as u16;
                let taken = self.tables.branch(self.status.flags, cond, self.switches);
                self.status.pc = self.status.pc.wrapping_add(disp.wrapping_mul(taken as u16));
            }

            // ==================== Unary ALU ====================

            Instruction::Unary { op, width } => {
                let (reg, count) = self.fetch_nibbles();
                let value = self.reg_sized(width, reg);
                let (result, flags) = self.unary(op, width, value, count);
                self.set_reg_sized(width, reg, result);
                self.status.flags = flags;
            }

            Instruction::UnaryImplicit { op, width } => {
                let reg = Self::target_index(Reg::A, width);
                let value = self.reg_sized(width, reg);
                let (result, flags) = self.unary(op, width, value, 0);
                self.set_reg_sized(width, reg, result);
                self.status.flags = flags;
            }

            Instruction::IncrementX => {
                let (result, produced) = alu::increment(Width::Word, self.reg(Reg::X), 1);
                self.set_reg(Reg::X, result);
                self.status.flags = self.status.flags.merge(alu::COUNT_KEEP, produced);
            }

            Instruction::DecrementX => {
                let (result, produced) = alu::decrement(Width::Word, self.reg(Reg::X), 1);
                self.set_reg(Reg::X, result);
                self.status.flags = self.status.flags.merge(alu::COUNT_KEEP, produced);
            }

            Instruction::Mmu => self.mmu_transfer()?,

            Instruction::Dma => self.dma(),

            Instruction::Block => self.block(),

            // ==================== Binary ALU ====================

            Instruction::Binary { op, width } => {
                let (s, d) = self.fetch_nibbles();
                let rule = match width {
                    Width::Byte => FaultRule::NonPositive,
                    Width::Word => FaultRule::Negative,
                };
                self.binary(op, width, s, d, rule);
            }

            Instruction::BinaryImplicit { op, width } => {
                let s = Self::target_index(Reg::A, width);
                let d = Self::target_index(Reg::B, width);
                self.binary(op, width, s, d, FaultRule::NonPositive);
            }

            Instruction::TransferA { to, width } => {
                let value = self.reg_sized(width, Self::target_index(Reg::A, width));
                self.set_reg_sized(width, Self::target_index(to, width), value);
                self.set_logic_flags(width, value);
            }

            // ==================== Load / Store ====================

            Instruction::Load { reg, width, mode } => {
                let addr = self.effective_address(mode, width)?;
                let value = self.read_sized(width, addr);
                self.set_reg_sized(width, Self::target_index(reg, width), value);
                self.set_logic_flags(width, value);
            }

            Instruction::Store { reg, width, mode } => {
                let value = self.reg_sized(width, Self::target_index(reg, width));
                let addr = self.effective_address(mode, width)?;
                self.write_sized(width, addr, value);
                self.set_logic_flags(width, value);
            }

            // ==================== Jump / Call ====================

            Instruction::Jump(mode) => {
                self.status.pc = self.effective_address(mode, Width::Word)?;
            }

            Instruction::JumpSubroutine(mode) => {
                let target = self.effective_address(mode, Width::Word)?;
                let x = self.reg(Reg::X);
                self.push_u16(x);
                self.set_reg(Reg::X, self.status.pc);
                self.set_reg(Reg::P, self.status.pc);
                self.status.pc = target;
            }

            Instruction::Jsys => {
                let argument = self.fetch_u8();
                self.push_u8(self.status.mmu_bank);
                self.push_u8(self.status.ipl);
                let x = self.reg(Reg::X);
                self.push_u16(x);
                self.set_reg(Reg::X, self.status.pc);
                self.push_u8(argument);
                self.set_mmu_bank(0);
                self.status.pc = SYSCALL_ENTRY;
                debug!("syscall {:02X} from {:04X}", argument, self.instr_pc);
            }

            Instruction::Syscall => {
                self.trigger_interrupt(SYSCALL_LEVEL);
            }

            Instruction::Push => {
                let (start, count) = self.fetch_nibbles();
                let sh = self.reg_u8(byte::SH);
                let sl = self.reg_u8(byte::SL);
                for i in start..=start + count {
                    let value = match i % 16 {
                        byte::SH => sh,
                        byte::SL => sl,
                        r => self.reg_u8(r),
                    };
                    self.push_u8(value);
                }
            }

            Instruction::Pop => {
                let (start, count) = self.fetch_nibbles();
                for i in (start..=start + count).rev() {
                    let value = self.pop_u8();
                    match i % 16 {
                        byte::SH | byte::SL => {}
                        r => self.set_reg_u8(r, value),
                    }
                }
            }
        }

        Ok(())
    }

    /// Result and new flags of a unary operation repeated/shifted by `count + 1`.
    fn unary(&self, op: UnaryOp, width: Width, value: u16, count: u8) -> (u16, Flags) {
        let flags = self.status.flags;
        let amount = count as u16 + 1;
        match (op, width) {
            (UnaryOp::Increment, _) => {
                let (result, produced) = alu::increment(width, value, amount);
                (result, flags.merge(alu::COUNT_KEEP, produced))
            }
            (UnaryOp::Decrement, _) => {
                let (result, produced) = alu::decrement(width, value, amount);
                (result, flags.merge(alu::COUNT_KEEP, produced))
            }
            // loads the count nibble, zero in the usual encoding
            (UnaryOp::Clear, _) => {
                let result = count as u16;
                (result, flags.merge(alu::LOGIC_KEEP, self.logic(width, result)))
            }
            (UnaryOp::Invert, _) => {
                let result = !value & width.mask() as u16;
                (result, flags.merge(alu::LOGIC_KEEP, self.logic(width, result)))
            }
            (UnaryOp::ShiftRight, Width::Byte) => {
                let (result, produced) = self.tables.shift_right_byte(value as u8, count);
                (result as u16, flags.merge(alu::SHIFT_RIGHT_KEEP, produced))
            }
            (UnaryOp::ShiftLeft, Width::Byte) => {
                let (result, produced) = self.tables.shift_left_byte(value as u8, count);
                (result as u16, flags.merge(alu::SHIFT_LEFT_KEEP, produced))
            }
            (UnaryOp::RotateRight, Width::Byte) => {
                let (result, produced) = self.tables.rotate_right_byte(value as u8, count, flags.link());
                (result as u16, flags.merge(alu::ROTATE_RIGHT_KEEP, produced))
            }
            (UnaryOp::RotateLeft, Width::Byte) => {
                let (result, produced) = self.tables.rotate_left_byte(value as u8, count, flags.link());
                (result as u16, flags.merge(alu::ROTATE_LEFT_BYTE_KEEP, produced))
            }
            (UnaryOp::ShiftRight, Width::Word) => {
                let (result, produced) = alu::shift_right(width, value, count);
                (result, flags.merge(alu::SHIFT_RIGHT_KEEP, produced))
            }
            (UnaryOp::ShiftLeft, Width::Word) => {
                let (result, produced) = alu::shift_left(width, value, count);
                (result, flags.merge(alu::SHIFT_LEFT_KEEP, produced))
            }
            (UnaryOp::RotateRight, Width::Word) => {
                let (result, produced) = alu::rotate_right(width, value, count, flags.link());
                (result, flags.merge(alu::ROTATE_RIGHT_KEEP, produced))
            }
            (UnaryOp::RotateLeft, Width::Word) => {
                let (result, produced) = alu::rotate_left(width, value, count, flags.link());
                (result, flags.merge(alu::ROTATE_LEFT_WORD_KEEP, produced))
            }
        }
    }

    /// `d := s op d` on register offsets `s` and `d`.
    fn binary(&mut self, op: BinaryOp, width: Width, s: u8, d: u8, rule: FaultRule) {
        let sv = self.reg_sized(width, s);
        let dv = self.reg_sized(width, d);
        match op {
            BinaryOp::Add => {
                let (result, flags) = alu::add(width, sv, dv);
                self.set_reg_sized(width, d, result);
                self.status.flags = flags;
            }
            BinaryOp::Subtract => {
                let (result, flags) = alu::subtract(width, sv, dv, rule);
                self.set_reg_sized(width, d, result);
                self.status.flags = flags;
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Transfer => {
                let result = match op {
                    BinaryOp::And => sv & dv,
                    BinaryOp::Or => sv | dv,
                    BinaryOp::Xor => sv ^ dv,
                    _ => sv,
                };
                self.set_reg_sized(width, d, result);
                self.set_logic_flags(width, result);
            }
        }
    }

    /// Leave an interrupt level through the C/P convention.
    fn return_from_interrupt(&mut self) {
        let c = self.reg(Reg::C);
        let prev = ((c >> 4) & 0xF) as u8;
        self.set_reg(Reg::C, (c & 0x0FFF) | (self.status.flags.bits() as u16) << 12);

        let from = self.status.ipl;
        self.status.ipl = prev;

        self.status.flags = Flags::from_bits((self.reg(Reg::C) >> 12) as u8);
        self.status.pc = self.reg(Reg::P);
        debug!("interrupt {} -> {} returned to {:04X}", from, prev, self.status.pc);
    }

    /// LDMMU / STMMU: move one bank of page-table entries from or to memory.
    fn mmu_transfer(&mut self) -> Result<(), CpuError> {
        let sub = self.fetch_u8();
        if sub != 0x0C && sub != 0x1C {
            warn!("unknown MMU operation {:02X} at {:04X} ignored", sub, self.instr_pc);
            return Ok(());
        }
        let bank = self.fetch_u8() & 0x7;
        let addr = self.fetch_u16();

        for page in 0..PAGES_PER_BANK as u8 {
            let at = addr.wrapping_add(page as u16);
            if sub == 0x0C {
                let value = self.read_u8(at);
                self.mmu.set_entry(bank, page, value)?;
            } else {
                let value = self.mmu.entry(bank, page)?;
                self.write_u8(at, value);
            }
        }
        debug!(
            "{} bank {} at {:04X}",
            if sub == 0x0C { "LDMMU" } else { "STMMU" },
            bank,
            addr
        );
        Ok(())
    }

    fn dma(&mut self) {
        let (reg, op) = self.fetch_nibbles();
        match op {
            0x0 => self.status.dma.addr = self.reg_u16(reg),
            0x1 => self.set_reg_u16(reg, self.status.dma.addr),
            0x2 => self.status.dma.count = self.reg_u16(reg),
            0x3 => self.set_reg_u16(reg, self.status.dma.count),
            0x4 => self.status.dma.mode = reg,
            0x6 => self.status.dma.enabled = true,
            _ => {}
        }
    }

    /// BCP / BCMP over `len` bytes.
    fn block(&mut self) {
        let sub = self.fetch_u8();
        if sub != 0x40 && sub != 0x80 {
            warn!("unknown block operation {:02X} at {:04X} ignored", sub, self.instr_pc);
            return;
        }
        let len = self.fetch_u8() as u16;
        let src = self.fetch_u16();
        let dst = self.fetch_u16();

        if sub == 0x40 {
            for i in 0..len {
                let value = self.read_u8(src.wrapping_add(i));
                self.write_u8(dst.wrapping_add(i), value);
            }
        } else {
            let mut equal = true;
            for i in 0..len {
                let a = self.read_u8(src.wrapping_add(i));
                let b = self.read_u8(dst.wrapping_add(i));
                equal &= a == b;
            }
            self.status.flags.set(Flags::VALUE, equal);
        }
    }

    /// Address of the opcode being executed, or last executed.
    pub fn instruction_pc(&self) -> u16 {
        self.instr_pc
    }

    /// Capture the processor state.
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            state: self.state(),
            status: self.status.clone(),
            switches: self.switches,
            opcount: self.opcount,
            sram: self.regs.clone(),
            mmu: self.mmu.clone(),
        }
    }

    /// Restore a captured state. The bus is left as it is.
    pub fn restore(&mut self, snapshot: &CpuSnapshot) {
        self.status = snapshot.status.clone();
        self.switches = snapshot.switches;
        self.opcount = snapshot.opcount;
        self.regs = snapshot.sram.clone();
        self.mmu = snapshot.mmu.clone();
        self.faulted = snapshot.state == CpuState::Error;
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state())
            .field("opcount", &self.opcount)
            .field("status", &self.status)
            .field("mem", &self.mem)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("decode error at {pc:04X}: {source}")]
    Decode {
        pc: u16,
        #[source]
        source: DecodeError,
    },

    #[error("invalid index mode {post:02X} at {pc:04X}")]
    InvalidIndexMode { post: u8, pc: u16 },

    #[error("MMU error: {0}")]
    Mmu(#[from] MmuError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Ram;

    /// A CPU with 256K of RAM behind the reset page tables.
    fn cpu_with_ram() -> Cpu {
        let mut mem = AddressSpace::new();
        mem.register("ram", 0, 0x40000, Ram::new(0x40000)).unwrap();
        Cpu::with_memory(mem)
    }

    fn cpu_with_program(program: &[u8]) -> Cpu {
        let mut cpu = cpu_with_ram();
        cpu.load(RESET_VECTOR, program);
        cpu
    }

    fn run_steps(cpu: &mut Cpu, n: usize) {
        for _ in 0..n {
            cpu.step().unwrap();
        }
    }

    #[test]
    fn test_reset_state() {
        let cpu = cpu_with_ram();
        assert_eq!(cpu.status.pc, 0xFC00);
        assert_eq!(cpu.status.flags, Flags::NONE);
        assert_eq!(cpu.status.ipl, 0);
        assert!(!cpu.status.interrupt_enable);
        assert_eq!(cpu.state(), CpuState::Running);
        assert_eq!(cpu.translate(0xFC00), 0x3FC00);
    }

    #[test]
    fn test_halt_is_terminal() {
        let mut cpu = cpu_with_program(&[0x00]);
        assert_eq!(cpu.step(), Ok(false));
        assert_eq!(cpu.opcount, 1);
        assert!(cpu.is_halted());
        assert_eq!(cpu.reg(Reg::P), 0xFC01);

        let before = cpu.snapshot();
        assert_eq!(cpu.step(), Ok(false));
        assert_eq!(cpu.step(), Ok(false));
        assert_eq!(cpu.snapshot(), before);
    }

    #[test]
    fn test_nop_advances() {
        let mut cpu = cpu_with_program(&[0x01, 0x01]);
        assert_eq!(cpu.step(), Ok(true));
        assert_eq!(cpu.status.pc, 0xFC01);
    }

    #[test]
    fn test_flag_control() {
        let mut cpu = cpu_with_program(&[0x02, 0x06, 0x08, 0x03, 0x04]);
        run_steps(&mut cpu, 2);
        assert_eq!(cpu.status.flags, Flags::FAULT | Flags::LINK);
        run_steps(&mut cpu, 1);
        assert_eq!(cpu.status.flags, Flags::FAULT);
        run_steps(&mut cpu, 2);
        assert_eq!(cpu.status.flags, Flags::NONE);
        assert!(cpu.status.interrupt_enable);
    }

    #[test]
    fn test_branch_always_backwards() {
        let mut cpu = cpu_with_ram();
        cpu.switches = 0x1;
        // BS1 -3 at 0x01FF: the displacement byte sits at 0x0200
        cpu.load(0x01FF, &[0x1A, 0xFD]);
        cpu.status.pc = 0x01FF;
        cpu.step().unwrap();
        assert_eq!(cpu.status.pc, 0x01FE);
    }

    #[test]
    fn test_branch_not_taken() {
        let mut cpu = cpu_with_program(&[0x14, 0x10]);
        cpu.step().unwrap();
        assert_eq!(cpu.status.pc, 0xFC02);
    }

    #[test]
    fn test_load_literal_and_flags() {
        // LDA #8000, LDAB #00
        let mut cpu = cpu_with_program(&[0x90, 0x80, 0x00, 0x80, 0x00]);
        cpu.status.flags = Flags::LINK | Flags::FAULT;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x8000);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::FAULT | Flags::MINUS);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x8000);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::FAULT | Flags::VALUE);
    }

    #[test]
    fn test_store_direct_and_indirect() {
        // LDA #1234, STA 2000, LDB #ABCD, STB @3000
        let mut cpu = cpu_with_program(&[
            0x90, 0x12, 0x34,
            0xB1, 0x20, 0x00,
            0xD0, 0xAB, 0xCD,
            0xF2, 0x30, 0x00,
        ]);
        cpu.write_u16(0x3000, 0x2100);
        run_steps(&mut cpu, 4);
        assert_eq!(cpu.read_u16(0x2000), 0x1234);
        assert_eq!(cpu.read_u16(0x2100), 0xABCD);
    }

    #[test]
    fn test_register_mode_uses_register_as_address() {
        // LDA (X)
        let mut cpu = cpu_with_program(&[0x9A]);
        cpu.set_reg(Reg::X, 0x4000);
        cpu.write_u16(0x4000, 0x5555);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x5555);
    }

    #[test]
    fn test_invalid_mode_is_fatal() {
        let mut cpu = cpu_with_program(&[0x96]);
        let err = cpu.step().unwrap_err();
        assert!(matches!(err, CpuError::Decode { pc: 0xFC00, .. }));
        assert_eq!(cpu.state(), CpuState::Error);
        assert_eq!(cpu.step(), Err(CpuError::NotRunning(CpuState::Error)));
        assert_eq!(cpu.opcount, 0);
    }

    #[test]
    fn test_increment_keeps_link_and_fault() {
        // INRB AL, 2 twice over 0xFE
        let mut cpu = cpu_with_program(&[0x20, 0x11]);
        cpu.set_reg(Reg::A, 0x00FE);
        cpu.status.flags = Flags::LINK | Flags::FAULT;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x0000);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::FAULT | Flags::VALUE);
    }

    #[test]
    fn test_clear_loads_count_nibble() {
        // CLR B, 0 ; CLRB AL, 3
        let mut cpu = cpu_with_program(&[0x32, 0x20, 0x22, 0x13]);
        cpu.set_reg(Reg::B, 0xFFFF);
        cpu.set_reg(Reg::A, 0xFFFF);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0);
        assert!(cpu.status.flags.value());
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0xFF03);
        assert!(!cpu.status.flags.value());
    }

    #[test]
    fn test_word_shift_right_through_instruction() {
        // SRR A, 2 : shift by three
        let mut cpu = cpu_with_program(&[0x34, 0x02]);
        cpu.set_reg(Reg::A, 0x8010);
        cpu.status.flags = Flags::FAULT;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0xF002);
        assert_eq!(cpu.status.flags, Flags::FAULT | Flags::MINUS);
    }

    #[test]
    fn test_byte_rotate_uses_link() {
        // RRRB AL
        let mut cpu = cpu_with_program(&[0x26, 0x10]);
        cpu.set_reg(Reg::A, 0x0001);
        cpu.status.flags = Flags::LINK;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x0080);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::MINUS);
    }

    #[test]
    fn test_add_and_subtract_registers() {
        // ADD A, B (B := A + B) ; SUBB AL, BL (BL := AL - BL)
        let mut cpu = cpu_with_program(&[0x50, 0x02, 0x41, 0x13]);
        cpu.set_reg(Reg::A, 0xFFFF);
        cpu.set_reg(Reg::B, 0x0002);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x0001);
        assert_eq!(cpu.status.flags, Flags::LINK);

        cpu.set_reg(Reg::A, 0x0005);
        cpu.set_reg(Reg::B, 0x0007);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x00FE);
        assert!(cpu.status.flags.minus());
        assert!(!cpu.status.flags.link());
    }

    #[test]
    fn test_word_sub_faults_on_strict_negative() {
        // SUB A, B with equal negative operands: the result is exactly zero
        let mut cpu = cpu_with_program(&[0x51, 0x02]);
        cpu.set_reg(Reg::A, 0x8000);
        cpu.set_reg(Reg::B, 0x8000);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x0000);
        assert_eq!(cpu.status.flags, Flags::VALUE | Flags::LINK | Flags::FAULT);
    }

    #[test]
    fn test_byte_sub_uses_non_positive_rule() {
        // SUBB AL, BL with equal negative operands
        let mut cpu = cpu_with_program(&[0x41, 0x13]);
        cpu.set_reg(Reg::A, 0x0080);
        cpu.set_reg(Reg::B, 0x1280);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x1200);
        assert_eq!(cpu.status.flags, Flags::VALUE | Flags::LINK);
    }

    #[test]
    fn test_implicit_subtracts_use_non_positive_rule() {
        // SAB ; SABB
        let mut cpu = cpu_with_program(&[0x59, 0x49]);
        cpu.set_reg(Reg::A, 0x8000);
        cpu.set_reg(Reg::B, 0x8000);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x0000);
        assert_eq!(cpu.status.flags, Flags::VALUE | Flags::LINK);

        cpu.set_reg(Reg::A, 0x0080);
        cpu.set_reg(Reg::B, 0x0080);
        cpu.status.flags = Flags::FAULT;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x0000);
        assert_eq!(cpu.status.flags, Flags::VALUE | Flags::LINK);
    }

    #[test]
    fn test_logic_ops_keep_link_and_fault() {
        // AND A, B ; ORI A, B ; ORE A, B ; NAB ; NABB
        let mut cpu = cpu_with_program(&[0x52, 0x02, 0x53, 0x02, 0x54, 0x02, 0x5A, 0x4A]);
        let kept = Flags::LINK | Flags::FAULT;

        cpu.status.flags = kept;
        cpu.set_reg(Reg::A, 0xF0F0);
        cpu.set_reg(Reg::B, 0x0FF0);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x00F0);
        assert_eq!(cpu.status.flags, kept);

        cpu.set_reg(Reg::A, 0x8000);
        cpu.set_reg(Reg::B, 0x0001);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x8001);
        assert_eq!(cpu.status.flags, kept | Flags::MINUS);

        cpu.set_reg(Reg::A, 0x1234);
        cpu.set_reg(Reg::B, 0x1234);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x0000);
        assert_eq!(cpu.status.flags, kept | Flags::VALUE);

        cpu.set_reg(Reg::A, 0xFF00);
        cpu.set_reg(Reg::B, 0x8F0F);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x8F00);
        assert_eq!(cpu.status.flags, kept | Flags::MINUS);

        cpu.set_reg(Reg::A, 0x00F0);
        cpu.set_reg(Reg::B, 0x120F);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::B), 0x1200);
        assert_eq!(cpu.status.flags, kept | Flags::VALUE);
    }

    #[test]
    fn test_invert_ignores_count_and_keeps_flags() {
        // IVR A, count 5
        let mut cpu = cpu_with_program(&[0x33, 0x05]);
        cpu.set_reg(Reg::A, 0x00FF);
        cpu.status.flags = Flags::LINK | Flags::FAULT;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0xFF00);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::FAULT | Flags::MINUS);
    }

    #[test]
    fn test_implicit_unary_forms() {
        // INA ; DCA ; CLA ; SRA ; SLA ; INAB
        let mut cpu = cpu_with_program(&[0x38, 0x39, 0x3A, 0x3C, 0x3D, 0x28]);
        let kept = Flags::LINK | Flags::FAULT;

        cpu.status.flags = kept;
        cpu.set_reg(Reg::A, 0xFFFF);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x0000);
        assert_eq!(cpu.status.flags, kept | Flags::VALUE);

        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0xFFFF);
        assert_eq!(cpu.status.flags, kept | Flags::MINUS);

        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x0000);
        assert_eq!(cpu.status.flags, kept | Flags::VALUE);

        // shift right keeps only FAULT; the bit shifted out lands in LINK
        cpu.status.flags = Flags::FAULT | Flags::VALUE;
        cpu.set_reg(Reg::A, 0x8001);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0xC000);
        assert_eq!(cpu.status.flags, Flags::FAULT | Flags::MINUS | Flags::LINK);

        // shift left replaces every flag; the sign change sets FAULT
        cpu.status.flags = kept;
        cpu.set_reg(Reg::A, 0x4000);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x8000);
        assert_eq!(cpu.status.flags, Flags::MINUS | Flags::FAULT);

        cpu.status.flags = kept;
        cpu.set_reg(Reg::A, 0x80FF);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x8000);
        assert_eq!(cpu.status.flags, kept | Flags::VALUE);
    }

    #[test]
    fn test_index_count_keeps_link_and_fault() {
        // INX ; DCX
        let mut cpu = cpu_with_program(&[0x3E, 0x3F]);
        cpu.status.flags = Flags::LINK | Flags::FAULT;
        cpu.set_reg(Reg::X, 0xFFFF);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::X), 0x0000);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::FAULT | Flags::VALUE);
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::X), 0xFFFF);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::FAULT | Flags::MINUS);
    }

    #[test]
    fn test_word_shift_left_and_rotates() {
        // SLR A ; RRR A ; RLR A
        let mut cpu = cpu_with_program(&[0x35, 0x00, 0x36, 0x00, 0x37, 0x00]);
        cpu.set_reg(Reg::A, 0x4001);
        cpu.status.flags = Flags::LINK | Flags::VALUE;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x8002);
        assert_eq!(cpu.status.flags, Flags::MINUS | Flags::FAULT);

        // the low bit rotates into LINK; FAULT survives a right rotate
        cpu.set_reg(Reg::A, 0x0001);
        cpu.status.flags = Flags::FAULT;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x0000);
        assert_eq!(cpu.status.flags, Flags::FAULT | Flags::LINK | Flags::VALUE);

        // LINK rotates into bit 0, the sign into LINK
        cpu.set_reg(Reg::A, 0x8000);
        cpu.status.flags = Flags::LINK;
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::A), 0x0001);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::FAULT);
    }

    #[test]
    fn test_implicit_transfer() {
        // XAZ, XAYB
        let mut cpu = cpu_with_program(&[0x5E, 0x4C]);
        cpu.set_reg(Reg::A, 0x1280);
        cpu.set_reg(Reg::Y, 0xAA00);
        run_steps(&mut cpu, 2);
        assert_eq!(cpu.reg(Reg::Z), 0x1280);
        assert_eq!(cpu.reg(Reg::Y), 0xAA80);
        assert!(cpu.status.flags.minus());
    }

    #[test]
    fn test_jsr_and_rsr() {
        // JSR 2000 ; at 2000: RSR
        let mut cpu = cpu_with_program(&[0x79, 0x20, 0x00, 0x01]);
        cpu.load(0x2000, &[0x09]);
        cpu.set_reg(Reg::S, 0x3000);
        cpu.set_reg(Reg::X, 0x1111);
        cpu.step().unwrap();
        assert_eq!(cpu.status.pc, 0x2000);
        assert_eq!(cpu.reg(Reg::X), 0xFC03);
        assert_eq!(cpu.reg(Reg::S), 0x2FFE);
        cpu.step().unwrap();
        assert_eq!(cpu.status.pc, 0xFC03);
        assert_eq!(cpu.reg(Reg::X), 0x1111);
        assert_eq!(cpu.reg(Reg::S), 0x3000);
    }

    #[test]
    fn test_interrupt_nesting_round_trip() {
        let mut cpu = cpu_with_ram();
        cpu.status.ipl = 2;
        cpu.status.interrupt_enable = true;
        cpu.status.pc = 0x2000;
        cpu.status.flags = Flags::LINK | Flags::MINUS;
        // level 5 handler: RI
        cpu.regs.set(5, Reg::P, 0x3000);
        cpu.regs.set(5, Reg::C, 0x0000);
        cpu.load(0x3000, &[0x0A]);

        assert!(cpu.trigger_interrupt(5));
        assert_eq!(cpu.status.ipl, 5);
        assert_eq!(cpu.status.pc, 0x3000);
        assert_eq!(cpu.regs.get(2, Reg::P), 0x2000);
        assert_eq!(cpu.regs.get(2, Reg::C) >> 12, 0x3);
        assert_eq!((cpu.regs.get(5, Reg::C) >> 4) & 0xF, 2);
        assert_eq!(cpu.status.flags, Flags::NONE);

        cpu.step().unwrap();
        assert_eq!(cpu.status.ipl, 2);
        assert_eq!(cpu.status.pc, 0x2000);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::MINUS);
        // RI saved the level-5 PC for the next entry
        assert_eq!(cpu.regs.get(5, Reg::P), 0x3001);
    }

    #[test]
    fn test_interrupt_gating() {
        let mut cpu = cpu_with_ram();
        assert!(!cpu.trigger_interrupt(3));
        cpu.status.interrupt_enable = true;
        cpu.status.ipl = 4;
        assert!(!cpu.trigger_interrupt(4));
        assert!(!cpu.trigger_interrupt(2));
        assert!(!cpu.trigger_interrupt(16));
        assert!(cpu.trigger_interrupt(6));
    }

    #[test]
    fn test_interrupt_wakes_halted_cpu() {
        let mut cpu = cpu_with_program(&[0x04, 0x00]);
        cpu.regs.set(1, Reg::P, 0x2000);
        cpu.load(0x2000, &[0x01]);
        run_steps(&mut cpu, 2);
        assert!(cpu.is_halted());
        assert!(cpu.trigger_interrupt(1));
        assert!(cpu.is_running());
        assert_eq!(cpu.step(), Ok(true));
        assert_eq!(cpu.status.pc, 0x2001);
    }

    #[test]
    fn test_push_pop_range_wraps() {
        // PUSH ZL..BH (9..18 wraps to 0..2), scramble, POP same range
        let mut cpu = cpu_with_program(&[0x7E, 0x99, 0x7F, 0x99]);
        cpu.set_reg(Reg::S, 0x3000);
        let originals: Vec<u8> = (0..16u8).map(|i| 0x10 + i).collect();
        for (i, &v) in originals.iter().enumerate() {
            if i as u8 != byte::SH && i as u8 != byte::SL {
                cpu.set_reg_u8(i as u8, v);
            }
        }
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::S), 0x3000 - 10);
        // pushed value of SH/SL is the stack pointer before the push
        assert_eq!(cpu.read_u8(0x3000 - 2), 0x30);
        assert_eq!(cpu.read_u8(0x3000 - 3), 0x00);

        for i in [9u8, 12, 13, 14, 15, 0, 1, 2] {
            cpu.set_reg_u8(i, 0xEE);
        }
        cpu.step().unwrap();
        assert_eq!(cpu.reg(Reg::S), 0x3000);
        for i in [9u8, 12, 13, 14, 15, 0, 1, 2] {
            assert_eq!(cpu.reg_u8(i), originals[i as usize], "register {}", i);
        }
    }

    #[test]
    fn test_mmu_load_store_round_trip() {
        // LDMMU 3, (2000) ; STMMU 3, (2100)
        let mut cpu = cpu_with_program(&[
            0x2E, 0x0C, 0x03, 0x20, 0x00,
            0x2E, 0x1C, 0x0B, 0x21, 0x00,
        ]);
        let pages: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(7) ^ 0x40).collect();
        cpu.load(0x2000, &pages);
        run_steps(&mut cpu, 2);
        assert_eq!(cpu.mmu.bank(3).unwrap(), &pages[..]);
        let stored: Vec<u8> = (0..32u16).map(|i| cpu.read_u8(0x2100 + i)).collect();
        assert_eq!(stored, pages);
    }

    #[test]
    fn test_block_copy_and_compare() {
        // BCP 4, 2000 -> 2100 ; BCMP 4, 2000, 2100 ; BCMP 5, ...
        let mut cpu = cpu_with_program(&[
            0x47, 0x40, 0x04, 0x20, 0x00, 0x21, 0x00,
            0x47, 0x80, 0x04, 0x20, 0x00, 0x21, 0x00,
            0x47, 0x80, 0x05, 0x20, 0x00, 0x21, 0x00,
        ]);
        cpu.load(0x2000, &[1, 2, 3, 4, 5]);
        cpu.status.flags = Flags::LINK;
        run_steps(&mut cpu, 2);
        assert_eq!(cpu.read_u8(0x2103), 4);
        assert_eq!(cpu.status.flags, Flags::LINK | Flags::VALUE);
        run_steps(&mut cpu, 1);
        assert_eq!(cpu.status.flags, Flags::LINK);
    }

    #[test]
    fn test_dma_registers() {
        // STDMA A ; STDMAC B ; DMAMODE 2 ; DMAENABLE ; LDDMA X
        let mut cpu = cpu_with_program(&[0x2F, 0x00, 0x2F, 0x22, 0x2F, 0x24, 0x2F, 0x06, 0x2F, 0x41]);
        cpu.set_reg(Reg::A, 0x8000);
        cpu.set_reg(Reg::B, 0x0100);
        run_steps(&mut cpu, 5);
        assert_eq!(cpu.status.dma, Dma { addr: 0x8000, count: 0x0100, enabled: true, mode: 2 });
        assert_eq!(cpu.reg(Reg::X), 0x8000);
    }

    #[test]
    fn test_jsys_and_rsys() {
        let mut cpu = cpu_with_program(&[0x66, 0x42]);
        cpu.set_mmu_bank(3);
        cpu.set_reg(Reg::S, 0x3000);
        cpu.set_reg(Reg::X, 0x1234);
        // bank 0 keeps the stack page mapped the same way as bank 3
        cpu.load(SYSCALL_ENTRY, &[0x0F]);
        cpu.step().unwrap();
        assert_eq!(cpu.status.pc, SYSCALL_ENTRY);
        assert_eq!(cpu.mmu_bank(), 0);
        assert_eq!(cpu.reg(Reg::X), 0xFC02);
        assert_eq!(cpu.read_u8(cpu.reg(Reg::S)), 0x42);

        cpu.step().unwrap();
        assert_eq!(cpu.status.pc, 0xFC02);
        assert_eq!(cpu.mmu_bank(), 3);
        assert_eq!(cpu.reg(Reg::X), 0x1234);
        assert_eq!(cpu.reg(Reg::S), 0x3000);
    }

    #[test]
    fn test_syscall_raises_level_15() {
        let mut cpu = cpu_with_program(&[0x04, 0x76]);
        cpu.regs.set(15, Reg::P, 0x2000);
        run_steps(&mut cpu, 2);
        assert_eq!(cpu.status.ipl, 15);
        assert_eq!(cpu.status.pc, 0x2000);
    }

    #[test]
    fn test_delay_is_a_plain_step() {
        // DLY ; NOP
        let mut cpu = cpu_with_program(&[0x0E, 0x01]);
        cpu.status.flags = Flags::LINK;
        assert_eq!(cpu.step(), Ok(true));
        assert_eq!(cpu.status.pc, 0xFC01);
        assert_eq!(cpu.status.flags, Flags::LINK);
        assert_eq!(cpu.step(), Ok(true));
        assert_eq!(cpu.status.pc, 0xFC02);
        assert_eq!(cpu.opcount, 2);
    }

    #[test]
    fn test_sram_window_bypasses_mmu() {
        let mut cpu = cpu_with_ram();
        cpu.write_u8(0x0001, 0x77);
        assert_eq!(cpu.reg(Reg::A), 0x0077);
        assert_eq!(cpu.mem.read_u8(0x0001), 0x00);
        cpu.status.ipl = 1;
        cpu.write_u16(0x0010, 0xCAFE);
        assert_eq!(cpu.reg(Reg::A), 0xCAFE);
    }

    #[test]
    fn test_legacy_bank_follows_ipl() {
        let mut cpu = cpu_with_ram();
        cpu.mmu.set_entry(1, 4, 0x50).unwrap();
        cpu.set_bank_select(BankSelect::Ipl);
        assert_eq!(cpu.translate(0x2000), 0x2000);
        cpu.status.ipl = 9;
        assert_eq!(cpu.translate(0x2000), 0x28000);
    }

    #[test]
    fn test_run_stops_at_halt() {
        let mut cpu = cpu_with_program(&[0x01, 0x01, 0x00, 0x01]);
        assert_eq!(cpu.run(100), Ok(3));
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut cpu = cpu_with_program(&[0x90, 0x00, 0x07, 0x00]);
        let start = cpu.snapshot();
        cpu.run(10).unwrap();
        assert_eq!(cpu.reg(Reg::A), 7);
        cpu.restore(&start);
        assert_eq!(cpu.reg(Reg::A), 0);
        assert_eq!(cpu.status.pc, 0xFC00);
        let json = serde_json::to_string(&start).unwrap();
        let back: CpuSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, start);
    }
}
