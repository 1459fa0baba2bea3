//! Memory-mapped cards that sit beside the CPU on the bus.
//!
//! Cards cannot reach the CPU directly. A card that wants attention raises
//! a level on the shared [`InterruptLine`]; the machine drains the line
//! between instructions.

pub mod diag;
pub mod mux;

pub use diag::DiagCard;
pub use mux::{Mux, Parity, PortSettings, StopBits};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Queue of interrupt requests shared between cards and the machine.
#[derive(Debug, Clone, Default)]
pub struct InterruptLine(Rc<RefCell<VecDeque<u8>>>);

impl InterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an interrupt at `level`.
    pub fn raise(&self, level: u8) {
        self.0.borrow_mut().push_back(level);
    }

    /// Oldest pending request.
    pub fn pop(&self) -> Option<u8> {
        self.0.borrow_mut().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Remove and return every pending request in the order raised.
    pub fn drain(&self) -> Vec<u8> {
        self.0.borrow_mut().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_shared_and_ordered() {
        let line = InterruptLine::new();
        let card_side = line.clone();
        card_side.raise(6);
        card_side.raise(2);
        assert!(!line.is_empty());
        assert_eq!(line.pop(), Some(6));
        assert_eq!(line.drain(), vec![2]);
        assert!(line.is_empty());
        assert_eq!(line.pop(), None);
    }
}
