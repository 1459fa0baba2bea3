//! The 19-bit physical address bus.
//!
//! Memory cards and device ports are [`Region`]s reserved over contiguous
//! ranges of the bus. An access is dispatched to the first reservation that
//! contains the address; reservations may not overlap. Reads from unmapped
//! addresses see an all-ones open bus and writes there vanish.

pub mod ram;
pub mod rom;

pub use ram::Ram;
pub use rom::Rom;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Highest physical address plus one.
pub const BUS_SIZE: u32 = 1 << 19;

/// Byte-addressable handler for one reserved range.
///
/// Offsets are relative to the start of the reservation.
pub trait Region {
    fn read_u8(&mut self, offset: u32) -> u8;

    fn write_u8(&mut self, offset: u32, value: u8);

    /// Big-endian word at `offset`. The low byte may lie past the end of
    /// the reservation; the region decides what it reads there.
    fn read_u16(&mut self, offset: u32) -> u16 {
        let hi = self.read_u8(offset);
        let lo = self.read_u8(offset + 1);
        u16::from_be_bytes([hi, lo])
    }

    fn write_u16(&mut self, offset: u32, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.write_u8(offset, hi);
        self.write_u8(offset + 1, lo);
    }

    /// Return to power-on state. Memory keeps its contents.
    fn reset(&mut self) {}
}

/// Lets a device stay reachable from the host after it is put on the bus.
impl<T: Region> Region for Rc<RefCell<T>> {
    fn read_u8(&mut self, offset: u32) -> u8 {
        self.borrow_mut().read_u8(offset)
    }

    fn write_u8(&mut self, offset: u32, value: u8) {
        self.borrow_mut().write_u8(offset, value)
    }

    fn read_u16(&mut self, offset: u32) -> u16 {
        self.borrow_mut().read_u16(offset)
    }

    fn write_u16(&mut self, offset: u32, value: u16) {
        self.borrow_mut().write_u16(offset, value)
    }

    fn reset(&mut self) {
        self.borrow_mut().reset()
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("reservation {name} at {start:05X}-{end:05X} overlaps {existing} at {existing_start:05X}-{existing_end:05X}")]
    Overlap {
        name: String,
        start: u32,
        end: u32,
        existing: String,
        existing_start: u32,
        existing_end: u32,
    },

    #[error("reservation {name} has zero length")]
    Empty { name: String },

    #[error("reservation {name} at {start:05X}+{len:X} runs past the end of the bus")]
    OutOfRange { name: String, start: u32, len: u32 },

    #[error("ROM image {name} holds {actual} bytes, {expected} required")]
    ImageTooShort { name: String, expected: usize, actual: usize },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

struct Reservation {
    name: String,
    start: u32,
    end: u32,
    region: Box<dyn Region>,
}

impl Reservation {
    #[inline]
    fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr <= self.end
    }
}

/// The physical address space.
#[derive(Default)]
pub struct AddressSpace {
    reservations: Vec<Reservation>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `len` bytes at `start` for `region`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        start: u32,
        len: u32,
        region: impl Region + 'static,
    ) -> Result<(), BusError> {
        let name = name.into();
        if len == 0 {
            return Err(BusError::Empty { name });
        }
        let end = match start.checked_add(len - 1) {
            Some(end) if end < BUS_SIZE => end,
            _ => return Err(BusError::OutOfRange { name, start, len }),
        };
        if let Some(other) = self.reservations.iter().find(|r| r.start <= end && start <= r.end) {
            return Err(BusError::Overlap {
                name,
                start,
                end,
                existing: other.name.clone(),
                existing_start: other.start,
                existing_end: other.end,
            });
        }

        tracing::debug!("region {} reserved at {:05X}-{:05X}", name, start, end);
        self.reservations.push(Reservation { name, start, end, region: Box::new(region) });
        Ok(())
    }

    /// Reset every region on the bus.
    pub fn reset(&mut self) {
        for r in &mut self.reservations {
            r.region.reset();
        }
    }

    /// `(name, start, end)` of every reservation in registration order.
    pub fn reservations(&self) -> impl Iterator<Item = (&str, u32, u32)> {
        self.reservations.iter().map(|r| (r.name.as_str(), r.start, r.end))
    }

    pub fn read_u8(&mut self, addr: u32) -> u8 {
        match self.reservations.iter_mut().find(|r| r.contains(addr)) {
            Some(r) => r.region.read_u8(addr - r.start),
            None => 0xFF,
        }
    }

    pub fn read_i8(&mut self, addr: u32) -> i8 {
        self.read_u8(addr) as i8
    }

    /// Big-endian word, handled entirely by the region owning `addr`.
    pub fn read_u16(&mut self, addr: u32) -> u16 {
        match self.reservations.iter_mut().find(|r| r.contains(addr)) {
            Some(r) => r.region.read_u16(addr - r.start),
            None => 0xFFFF,
        }
    }

    pub fn read_i16(&mut self, addr: u32) -> i16 {
        self.read_u16(addr) as i16
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) {
        if let Some(r) = self.reservations.iter_mut().find(|r| r.contains(addr)) {
            r.region.write_u8(addr - r.start, value);
        }
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) {
        if let Some(r) = self.reservations.iter_mut().find(|r| r.contains(addr)) {
            r.region.write_u16(addr - r.start, value);
        }
    }

    /// Copy `data` onto the bus starting at `addr`.
    pub fn load(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u32), b);
        }
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, start, end) in self.reservations() {
            map.entry(&name, &format_args!("{:05X}-{:05X}", start, end));
        }
        map.finish()
    }
}
