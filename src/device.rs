//! Backing memory device seen by the virtual memory model
//!
//! Only two facts are consumed: the current cycle of the device and its
//! capacity in bytes.

use core::cell::Cell;
use std::rc::Rc;

/// The memory controller the simulated physical addresses land on.
pub trait MemoryDevice {
    /// current cycle of the device clock, never decreasing
    fn current_cycle(&self) -> u64;
    /// total capacity in bytes
    fn size(&self) -> u64;
}

impl<T: MemoryDevice + ?Sized> MemoryDevice for &T {
    fn current_cycle(&self) -> u64 {
        (**self).current_cycle()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

impl<T: MemoryDevice + ?Sized> MemoryDevice for Rc<T> {
    fn current_cycle(&self) -> u64 {
        (**self).current_cycle()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// A fixed-capacity device whose clock is driven by its owner.
#[derive(Debug)]
pub struct SimDram {
    size: u64,
    cycle: Cell<u64>,
}

impl SimDram {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            cycle: Cell::new(0),
        }
    }

    pub fn tick(&self) {
        self.advance(1);
    }

    pub fn advance(&self, cycles: u64) {
        self.cycle.set(self.cycle.get() + cycles);
    }

    /// Jump the clock forward. Moving it backwards is ignored.
    pub fn set_cycle(&self, cycle: u64) {
        if cycle > self.cycle.get() {
            self.cycle.set(cycle);
        }
    }
}

impl MemoryDevice for SimDram {
    fn current_cycle(&self) -> u64 {
        self.cycle.get()
    }

    fn size(&self) -> u64 {
        self.size
    }
}
