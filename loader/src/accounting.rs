//! Fault/allocation/fragmentation counters for the lazy loader.

use std::cell::Cell;

/// Monotonically non-decreasing counters, updated only by the fault
/// resolver while the rest of the loader is paused — no locking needed.
#[derive(Default)]
pub struct Counters {
    faults: Cell<u64>,
    allocations: Cell<u64>,
    frag_bytes: Cell<u64>,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            faults: Cell::new(0),
            allocations: Cell::new(0),
            frag_bytes: Cell::new(0),
        }
    }

    pub fn record_fault(&self) {
        self.faults.set(self.faults.get() + 1);
    }

    pub fn record_allocation(&self) {
        self.allocations.set(self.allocations.get() + 1);
    }

    pub fn add_fragmentation(&self, bytes: u64) {
        self.frag_bytes.set(self.frag_bytes.get() + bytes);
    }

    pub fn faults(&self) -> u64 {
        self.faults.get()
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.get()
    }

    pub fn frag_kb(&self) -> f64 {
        self.frag_bytes.get() as f64 / 1024.0
    }
}

// SAFETY: the loader is single-threaded; the only concurrent access to a
// `Counters` is from the SIGSEGV handler, which runs with the rest of the
// process suspended on the same thread, never actually in parallel.
unsafe impl Sync for Counters {}
