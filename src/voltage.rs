//! One-shot cutdown-voltage sampling.
//!
//! The foreground asks for a conversion with [`VoltageSampler::start`]; the
//! conversion context (ADC task or completion interrupt) waits for that
//! request, converts, powers the ADC down and posts the raw code back with
//! [`VoltageSampler::complete`]. Both directions are single-slot mailboxes, so
//! a repeated request collapses into one and only the newest result is kept.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Linear raw-code → volts conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageScale {
    /// ADC reference voltage.
    pub vref: f32,
    /// Raw code at `vref`.
    pub full_scale: u16,
    /// Resistor divider ratio in front of the ADC pin.
    pub divider: f32,
}

impl VoltageScale {
    pub fn to_volts(&self, raw: u16) -> f32 {
        raw.min(self.full_scale) as f32 * self.vref / self.full_scale as f32 * self.divider
    }
}

impl Default for VoltageScale {
    fn default() -> Self {
        // 12-bit ADC, 3.3 V reference, 10k/30k divider
        Self {
            vref: 3.3,
            full_scale: 4095,
            divider: 4.0,
        }
    }
}

pub struct VoltageSampler {
    request: Signal<CriticalSectionRawMutex, ()>,
    result: Signal<CriticalSectionRawMutex, u16>,
    pending: AtomicBool,
}

impl VoltageSampler {
    pub const fn new() -> Self {
        Self {
            request: Signal::new(),
            result: Signal::new(),
            pending: AtomicBool::new(false),
        }
    }

    /// Request one conversion. Never blocks.
    pub fn start(&self) {
        self.pending.store(true, Ordering::Release);
        self.request.signal(());
    }

    /// True between `start` and the matching `complete`.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Conversion side: wait until a conversion is requested.
    pub async fn wait_request(&self) {
        self.request.wait().await
    }

    /// Conversion side: post the raw code.
    pub fn complete(&self, raw: u16) {
        self.result.signal(raw);
        self.pending.store(false, Ordering::Release);
    }

    /// Foreground: take the latest result if one arrived.
    pub fn try_take(&self) -> Option<u16> {
        self.result.try_take()
    }

    pub async fn wait(&self) -> u16 {
        self.result.wait().await
    }
}

impl Default for VoltageSampler {
    fn default() -> Self {
        Self::new()
    }
}
