//! Cutdown countdown, decremented by the tick interrupt.

use core::sync::atomic::{AtomicU32, Ordering};

/// Ticks left until the timed cutdown is allowed.
///
/// Only ever decreases and saturates at zero. It lives in RAM, so a reset
/// re-arms it with the full period.
pub struct Countdown {
    ticks: AtomicU32,
    tick_hz: u32,
}

impl Countdown {
    pub const fn new(ticks: u32, tick_hz: u32) -> Self {
        Self {
            ticks: AtomicU32::new(ticks),
            tick_hz,
        }
    }

    pub const fn from_minutes(minutes: u32, tick_hz: u32) -> Self {
        Self::new(minutes.saturating_mul(60).saturating_mul(tick_hz), tick_hz)
    }

    /// Saturating decrement. Safe to call from the tick interrupt.
    pub fn tick(&self) {
        let _ = self
            .ticks
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| t.checked_sub(1));
    }

    pub fn remaining_ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn expired(&self) -> bool {
        self.remaining_ticks() == 0
    }

    /// Whole minutes left, rounded up so the value only reads 0 once expired.
    pub fn remaining_minutes(&self) -> u32 {
        let per_minute = self.tick_hz.saturating_mul(60).max(1);
        self.remaining_ticks().div_ceil(per_minute)
    }
}
