//! Four-port serial multiplexer card.
//!
//! Register map, relative to the card base:
//!
//! | offset | read               | write                 |
//! |--------|--------------------|-----------------------|
//! | 0,2,4,6,8 | port status     | port configuration    |
//! | 1,3,5,7   | receive data    | transmit data         |
//! | 0xA    | open bus           | interrupt level       |
//! | 0xE    | open bus           | enable interrupts     |
//! | 0xF    | interrupt flags    |                       |
//!
//! The port is `(offset >> 1) & 3`. Received bytes wait in a FIFO per
//! port; transmitted bytes collect in a buffer the host drains.

use crate::bus::Region;
use crate::devices::InterruptLine;
use serde::{Serialize, Deserialize};
use std::collections::VecDeque;
use tracing::debug;

/// Default base address of the first mux card.
pub const MUX_BASE: u32 = 0x3F200;

/// Bytes reserved by a mux card.
pub const MUX_LEN: u32 = 0x20;

pub const PORTS: usize = 4;

/// Status register bits.
pub mod status {
    pub const CAN_READ: u8 = 0x01;
    pub const CAN_WRITE: u8 = 0x02;
    pub const PARITY_ERROR: u8 = 0x04;
    pub const FRAMING_ERROR: u8 = 0x08;
    pub const OVERRUN_ERROR: u8 = 0x10;
}

/// Configuration register bit positions.
mod config {
    pub const EVEN_PARITY: u8 = 0;
    pub const CLS2: u8 = 1;
    pub const CLS1: u8 = 2;
    pub const TWO_STOP_BITS: u8 = 3;
    pub const NO_PARITY: u8 = 4;
}

const DATA_BITS: [u8; 4] = [5, 6, 7, 8];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    pub can_read: bool,
    pub can_write: bool,
    pub parity_error: bool,
    pub framing_error: bool,
    pub overrun_error: bool,
}

impl PortStatus {
    pub fn bits(&self) -> u8 {
        let mut value = 0;
        if self.can_read {
            value |= status::CAN_READ;
        }
        if self.can_write {
            value |= status::CAN_WRITE;
        }
        if self.parity_error {
            value |= status::PARITY_ERROR;
        }
        if self.framing_error {
            value |= status::FRAMING_ERROR;
        }
        if self.overrun_error {
            value |= status::OVERRUN_ERROR;
        }
        value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OneAndHalf,
    Two,
}

/// Line settings written to a port's configuration register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl PortSettings {
    /// Decode a configuration byte. The baud rate is fixed at 9600.
    pub fn decode(value: u8) -> Self {
        let bit = |n: u8| value >> n & 1 != 0;

        let parity = if bit(config::NO_PARITY) {
            Parity::None
        } else if bit(config::EVEN_PARITY) {
            Parity::Even
        } else {
            Parity::Odd
        };

        let index = (bit(config::CLS2) as usize) << 1 | bit(config::CLS1) as usize;
        let data_bits = DATA_BITS[index];

        let stop_bits = match (bit(config::TWO_STOP_BITS), data_bits) {
            (false, _) => StopBits::One,
            (true, 5) => StopBits::OneAndHalf,
            (true, _) => StopBits::Two,
        };

        Self { baud: 9600, data_bits, stop_bits, parity }
    }
}

/// The multiplexer card.
#[derive(Debug)]
pub struct Mux {
    ports: [PortStatus; PORTS],
    settings: [Option<PortSettings>; PORTS],
    input: [VecDeque<u8>; PORTS],
    output: [Vec<u8>; PORTS],
    interrupts_enabled: bool,
    interrupt_level: u8,
    interrupt_flags: u8,
    line: InterruptLine,
}

impl Mux {
    /// Create a card raising its interrupts on `line`.
    pub fn new(line: InterruptLine) -> Self {
        let mut mux = Self {
            ports: [PortStatus::default(); PORTS],
            settings: [None; PORTS],
            input: Default::default(),
            output: Default::default(),
            interrupts_enabled: false,
            interrupt_level: 0,
            interrupt_flags: 0,
            line,
        };
        mux.reset_ports();
        mux
    }

    fn reset_ports(&mut self) {
        self.ports = [PortStatus::default(); PORTS];
        self.ports[0].can_write = true;
    }

    /// Queue a received byte on `port`.
    pub fn push_input(&mut self, port: usize, byte: u8) {
        let port = port % PORTS;
        self.input[port].push_back(byte);
        self.set_can_read(port, true);
    }

    /// Queue several received bytes on `port`.
    pub fn push_str(&mut self, port: usize, text: &[u8]) {
        for &b in text {
            self.push_input(port, b);
        }
    }

    /// Take everything transmitted on `port` since the last call.
    pub fn take_output(&mut self, port: usize) -> Vec<u8> {
        std::mem::take(&mut self.output[port % PORTS])
    }

    pub fn status(&self, port: usize) -> PortStatus {
        self.ports[port % PORTS]
    }

    /// Last line settings written to `port`, if any.
    pub fn settings(&self, port: usize) -> Option<PortSettings> {
        self.settings[port % PORTS]
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    pub fn interrupt_level(&self) -> u8 {
        self.interrupt_level
    }

    /// A fresh character raises the card's interrupt when enabled.
    pub fn set_can_read(&mut self, port: usize, value: bool) {
        let status = &mut self.ports[port % PORTS];
        let new_char = value && !status.can_read;
        status.can_read = value;

        if new_char && self.interrupts_enabled {
            self.interrupt_flags = 0;
            self.line.raise(self.interrupt_level);
        }
    }

    pub fn set_can_write(&mut self, port: usize, value: bool) {
        self.ports[port % PORTS].can_write = value;
    }

    pub fn set_parity_error(&mut self, port: usize, value: bool) {
        self.ports[port % PORTS].parity_error = value;
    }

    pub fn set_framing_error(&mut self, port: usize, value: bool) {
        self.ports[port % PORTS].framing_error = value;
    }

    pub fn set_overrun_error(&mut self, port: usize, value: bool) {
        self.ports[port % PORTS].overrun_error = value;
    }

    fn receive(&mut self, port: usize) -> u8 {
        match self.input[port].pop_front() {
            Some(byte) => {
                if self.input[port].is_empty() {
                    self.set_can_read(port, false);
                }
                byte
            }
            None => {
                self.set_can_read(port, false);
                0xFF
            }
        }
    }
}

impl Region for Mux {
    fn read_u8(&mut self, offset: u32) -> u8 {
        if offset == 0xF {
            return self.interrupt_flags;
        }
        if offset <= 0x8 {
            let port = (offset as usize >> 1) & 0x3;
            return if offset & 1 == 1 {
                self.receive(port)
            } else {
                self.ports[port].bits()
            };
        }
        0xFF
    }

    fn write_u8(&mut self, offset: u32, value: u8) {
        match offset {
            0xE => self.interrupts_enabled = true,
            0xA => {
                self.interrupt_level = value;
                debug!("mux interrupt level set to {}", value);
            }
            0x0..=0x8 => {
                let port = (offset as usize >> 1) & 0x3;
                if offset & 1 == 1 {
                    self.output[port].push(value & 0x7F);
                } else {
                    let settings = PortSettings::decode(value);
                    debug!(
                        "mux port {} set to {} baud, {} data bits, {:?} stop bits, {:?} parity",
                        port, settings.baud, settings.data_bits, settings.stop_bits, settings.parity
                    );
                    self.settings[port] = Some(settings);
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.reset_ports();
    }
}
