//! Compile-time configuration of the payload.

use crate::control::ActuatorLimits;
use crate::voltage::VoltageScale;

// ── Telemetry ────────────────────────────────────────────────────────────────
pub const CALLSIGN: &str = "BUSEDS1";

/// RTTY baud rate; the tick interrupt runs at exactly this rate.
pub const RTTY_BAUD: u32 = 50;
pub const TICK_HZ: u32 = RTTY_BAUD;

/// Largest string the modem slot accepts.
pub const RTTY_MAX_LEN: usize = 512;

/// Working buffer for one encoded sentence.
pub const FRAME_CAPACITY: usize = 200;

// ── GPS ──────────────────────────────────────────────────────────────────────
/// NMEA lines are at most 82 characters including `$` and CRLF.
pub const NMEA_CAPTURE_LEN: usize = 96;

// ── Storage ──────────────────────────────────────────────────────────────────
pub const BLOCK_SIZE: usize = 512;
/// Reserved block holding the log cursor.
pub const CURSOR_BLOCK: u32 = 0;
pub const FIRST_PAYLOAD_BLOCK: u32 = CURSOR_BLOCK + 1;

// ── Loop timing ──────────────────────────────────────────────────────────────
pub const CONTROL_LOOP_HZ: u64 = 1;
/// Independent watchdog period. The control loop must finish well inside it.
pub const WATCHDOG_TIMEOUT_US: u32 = 2_000_000;

/// Countdown armed at boot; cutdown is allowed once it reaches zero.
pub const CUTDOWN_AFTER_MINUTES: u32 = 180;

/// Runtime-tunable knobs handed to the flight computer at startup.
#[derive(Debug, Clone, Copy)]
pub struct FlightConfig {
    pub limits: ActuatorLimits,
    pub voltage: VoltageScale,
    /// Log a stats line every this many cycles (0 disables).
    pub stats_every: u32,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            limits: ActuatorLimits::default(),
            voltage: VoltageScale::default(),
            stats_every: 60,
        }
    }
}
