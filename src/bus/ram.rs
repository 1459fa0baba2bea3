//! Read/write memory cards.

use crate::bus::Region;
use std::cell::RefCell;
use std::rc::Rc;

/// A RAM card.
///
/// Clones made with [`Ram::mirror`] share the same storage, so one card can
/// answer at several bus addresses.
#[derive(Debug, Clone)]
pub struct Ram {
    data: Rc<RefCell<Vec<u8>>>,
}

impl Ram {
    /// Create a zero-filled card of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self { data: Rc::new(RefCell::new(vec![0; size])) }
    }

    /// Another view of the same storage.
    pub fn mirror(&self) -> Self {
        Self { data: Rc::clone(&self.data) }
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Region for Ram {
    fn read_u8(&mut self, offset: u32) -> u8 {
        self.data.borrow().get(offset as usize).copied().unwrap_or(0xFF)
    }

    fn write_u8(&mut self, offset: u32, value: u8) {
        if let Some(cell) = self.data.borrow_mut().get_mut(offset as usize) {
            *cell = value;
        }
    }
}
