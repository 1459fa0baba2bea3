//! A complete machine: CPU, memory cards and I/O cards on one bus.

use crate::bus::{AddressSpace, BusError, Ram, Rom};
use crate::config::{ConfigError, MachineConfig};
use crate::cpu::execute::{Cpu, CpuError};
use crate::devices::diag::{DiagCard, DIAG_LEN};
use crate::devices::mux::{Mux, MUX_LEN};
use crate::devices::InterruptLine;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Serial port whose traffic the host terminal sees.
pub const CONSOLE_PORT: usize = 0;

/// How a [`Machine::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Instructions executed by this call.
    pub steps: u64,
    /// The CPU halted with no interrupt pending.
    pub halted: bool,
}

pub struct Machine {
    pub cpu: Cpu,
    mux: Option<Rc<RefCell<Mux>>>,
    diag: Option<Rc<RefCell<DiagCard>>>,
    line: InterruptLine,
    cpu_switches: u8,
    batch_size: u64,
}

impl Machine {
    /// Build and reset a machine.
    pub fn from_config(config: &MachineConfig) -> Result<Self, MachineError> {
        let line = InterruptLine::new();
        let mut mem = AddressSpace::new();

        for (i, ram) in config.ram.iter().enumerate() {
            let card = Ram::new(ram.size as usize);
            if let Some(at) = ram.mirror {
                mem.register(format!("ram{} mirror", i), at, ram.size, card.mirror())?;
            }
            mem.register(format!("ram{}", i), ram.start, ram.size, card)?;
        }

        for rom in &config.roms {
            match Rom::load(&rom.path, rom.size as usize) {
                Ok(image) => {
                    let name = image.name().to_string();
                    mem.register(name, rom.start, rom.size, image)?;
                }
                Err(e) if rom.optional => warn!("optional ROM skipped: {}", e),
                Err(e) => return Err(e.into()),
            }
        }

        let diag = match &config.diag {
            Some(cfg) => {
                let card = Rc::new(RefCell::new(DiagCard::new(cfg.switches)));
                mem.register("diag", cfg.base, DIAG_LEN, card.clone())?;
                Some(card)
            }
            None => None,
        };

        let mux = match &config.mux {
            Some(cfg) => {
                let card = Rc::new(RefCell::new(Mux::new(line.clone())));
                mem.register("mux", cfg.base, MUX_LEN, card.clone())?;
                Some(card)
            }
            None => None,
        };

        let mut cpu = Cpu::with_memory(mem);
        cpu.set_reset_vector(config.reset_vector);
        cpu.set_bank_select(config.mmu_bank_select);

        let mut machine = Self {
            cpu,
            mux,
            diag,
            line,
            cpu_switches: config.cpu_switches,
            batch_size: config.batch_size.max(1),
        };
        machine.reset();
        debug!("machine built: {:?}", machine.cpu.mem);
        Ok(machine)
    }

    /// Reset every card, then the CPU.
    pub fn reset(&mut self) {
        self.cpu.mem.reset();
        self.cpu.reset();
        self.cpu.switches = self.cpu_switches;
        self.line.drain();
    }

    pub fn mux(&self) -> Option<&Rc<RefCell<Mux>>> {
        self.mux.as_ref()
    }

    pub fn diag(&self) -> Option<&Rc<RefCell<DiagCard>>> {
        self.diag.as_ref()
    }

    pub fn interrupt_line(&self) -> &InterruptLine {
        &self.line
    }

    /// Type `bytes` into the console port. Returns false without a mux.
    pub fn send_input(&self, bytes: &[u8]) -> bool {
        match &self.mux {
            Some(mux) => {
                mux.borrow_mut().push_str(CONSOLE_PORT, bytes);
                true
            }
            None => false,
        }
    }

    /// Everything the console port transmitted since the last call.
    pub fn take_output(&self) -> Vec<u8> {
        self.mux
            .as_ref()
            .map(|mux| mux.borrow_mut().take_output(CONSOLE_PORT))
            .unwrap_or_default()
    }

    /// Forward pending interrupt requests to the CPU.
    fn service_interrupts(&mut self) {
        while let Some(level) = self.line.pop() {
            if !self.cpu.trigger_interrupt(level) {
                debug!("interrupt {} not accepted at level {}", level, self.cpu.status.ipl);
            }
        }
    }

    /// Deliver pending interrupts, then execute one instruction.
    pub fn step(&mut self) -> Result<bool, MachineError> {
        self.service_interrupts();
        Ok(self.cpu.step()?)
    }

    /// Run up to `max_steps` instructions in batches, handing console
    /// output to `sink` after each batch.
    ///
    /// Stops early when the CPU halts with no interrupt pending.
    pub fn run(&mut self, max_steps: u64, mut sink: impl FnMut(&[u8])) -> Result<RunSummary, MachineError> {
        let start = self.cpu.opcount;
        let executed = |cpu: &Cpu| cpu.opcount - start;
        let mut halted = false;

        while !halted && executed(&self.cpu) < max_steps {
            let batch_end = (executed(&self.cpu) + self.batch_size).min(max_steps);
            while executed(&self.cpu) < batch_end {
                let ran = self.step();
                match ran {
                    Ok(false) if self.cpu.is_halted() && self.line.is_empty() => {
                        halted = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.flush(&mut sink);
                        return Err(e);
                    }
                }
            }
            self.flush(&mut sink);
        }

        let summary = RunSummary { steps: executed(&self.cpu), halted };
        if halted {
            info!("machine halted after {} instructions", summary.steps);
        }
        Ok(summary)
    }

    fn flush(&self, sink: &mut impl FnMut(&[u8])) {
        let out = self.take_output();
        if !out.is_empty() {
            sink(&out);
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("cpu", &self.cpu)
            .field("mux", &self.mux.is_some())
            .field("diag", &self.diag.is_some())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Errors from building or running a machine.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("CPU error: {0}")]
    Cpu(#[from] CpuError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
