//! Actuator decisions.
//!
//! Pure functions of the current cycle's inputs. Nothing here latches: the
//! cutdown output in particular is recomputed every cycle and keeps being
//! asserted for as long as its condition holds.

/// Altitude and temperature thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorLimits {
    /// Auxiliary power is enabled below this altitude (m).
    pub aux_power_below_m: f32,
    /// Timed cutdown needs at least this altitude (m).
    pub cutdown_floor_m: f32,
    /// Cutdown fires above this altitude regardless of the countdown (m).
    pub cutdown_ceiling_m: f32,
    /// Heater is enabled below this internal temperature (°C).
    pub heater_below_c: f32,
}

impl Default for ActuatorLimits {
    fn default() -> Self {
        Self {
            aux_power_below_m: 2_000.0,
            cutdown_floor_m: 300.0,
            cutdown_ceiling_m: 32_000.0,
            heater_below_c: 0.0,
        }
    }
}

/// Output states for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Actuation {
    pub cutdown: bool,
    pub heater: bool,
    pub aux_power: bool,
}

pub fn aux_power(altitude_m: Option<f32>, limits: &ActuatorLimits) -> bool {
    matches!(altitude_m, Some(alt) if alt < limits.aux_power_below_m)
}

/// Fire when the countdown has expired above the safety floor, or whenever
/// the ceiling is exceeded. Unknown altitude never fires.
pub fn cutdown(countdown_expired: bool, altitude_m: Option<f32>, limits: &ActuatorLimits) -> bool {
    let Some(alt) = altitude_m else {
        return false;
    };
    let timed = countdown_expired && alt > limits.cutdown_floor_m;
    let ceiling = alt > limits.cutdown_ceiling_m;
    timed || ceiling
}

pub fn heater(internal_temp_c: Option<f32>, limits: &ActuatorLimits) -> bool {
    matches!(internal_temp_c, Some(t) if t < limits.heater_below_c)
}

pub fn decide(
    countdown_expired: bool,
    altitude_m: Option<f32>,
    internal_temp_c: Option<f32>,
    limits: &ActuatorLimits,
) -> Actuation {
    Actuation {
        cutdown: cutdown(countdown_expired, altitude_m, limits),
        heater: heater(internal_temp_c, limits),
        aux_power: aux_power(altitude_m, limits),
    }
}
