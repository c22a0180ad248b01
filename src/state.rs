/// Shared state types passed between the sampling, control and telemetry stages.
///
/// All types are `Copy` so they can be published through a [`SnapshotCell`]
/// and copied out with interrupts masked.
///
/// [`SnapshotCell`]: crate::sync::SnapshotCell

// ── GPS ───────────────────────────────────────────────────────────────────────

/// UTC time of day as reported by the last GGA sentence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpsTime {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

/// Last validated GPS fix.
///
/// Without a fix (`fix_valid == false`) the position fields hold the zero
/// triple rather than a stale position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpsFix {
    pub time: GpsTime,
    /// Decimal degrees, north positive.
    pub lat: f64,
    /// Decimal degrees, east positive.
    pub lon: f64,
    /// Metres above MSL.
    pub alt: f32,
    pub satellites: u8,
    pub fix_valid: bool,
}

impl GpsFix {
    /// No fix yet: zero time, zero position.
    pub const NONE: Self = Self {
        time: GpsTime {
            hours: 0,
            minutes: 0,
            seconds: 0,
        },
        lat: 0.0,
        lon: 0.0,
        alt: 0.0,
        satellites: 0,
        fix_valid: false,
    };
}

// ── Barometer ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BaroReading {
    pub temperature_c: f32,
    pub pressure_pa: f32,
    /// False when the conversion failed; pressure is then meaningless.
    pub valid: bool,
}

// ── Cycle input ───────────────────────────────────────────────────────────────

/// Everything one control cycle knows about the world.
///
/// `None` marks a value as unknown (sensor failed or invalid) and must never
/// be read as a number.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSnapshot {
    /// Barometric altitude in metres, unknown when the pressure was invalid.
    pub altitude_m: Option<f32>,
    pub external_temp_c: Option<f32>,
    pub internal_temp_c: Option<f32>,
    pub pressure_valid: bool,
    pub gps: GpsFix,
    /// Raw accelerometer counts.
    pub accel: [i16; 3],
    pub cutdown_voltage: f32,
}
