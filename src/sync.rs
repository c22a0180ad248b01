//! Cells shared between interrupt-driven producers and the foreground loop.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Single-value cell whose writes and reads run with interrupts masked.
///
/// A producer in interrupt context publishes the latest value; the foreground
/// copies it out. Both sides hold the critical section only for the copy, so
/// a reader can never observe a half-written value.
pub struct SnapshotCell<T: Copy> {
    inner: Mutex<CriticalSectionRawMutex, Cell<T>>,
}

impl<T: Copy> SnapshotCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    pub fn publish(&self, value: T) {
        self.inner.lock(|cell| cell.set(value));
    }

    pub fn read(&self) -> T {
        self.inner.lock(|cell| cell.get())
    }

    /// Read-modify-write under a single critical section.
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        self.inner.lock(|cell| cell.set(f(cell.get())));
    }
}
