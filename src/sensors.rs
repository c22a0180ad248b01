//! Sensor collaborators and per-cycle sampling.

use micromath::F32Ext;

use crate::state::{BaroReading, GpsFix, SensorSnapshot};
use crate::sync::SnapshotCell;
use crate::voltage::{VoltageSampler, VoltageScale};

/// Latest-value accessors for the on-board sensors.
///
/// A failed thermometer read is `None`; the barometer reports validity in
/// its reading.
#[allow(async_fn_in_trait)]
pub trait SensorSuite {
    async fn barometer(&mut self) -> BaroReading;
    async fn external_temperature(&mut self) -> Option<f32>;
    async fn internal_temperature(&mut self) -> Option<f32>;
    /// Raw accelerometer counts, x/y/z.
    async fn acceleration(&mut self) -> [i16; 3];
}

/// Gathers one [`SensorSnapshot`] per control cycle.
pub struct SensorSampler<'a> {
    gps: &'a SnapshotCell<GpsFix>,
    voltage: &'a VoltageSampler,
    scale: VoltageScale,
    last_volts: f32,
}

impl<'a> SensorSampler<'a> {
    pub fn new(gps: &'a SnapshotCell<GpsFix>, voltage: &'a VoltageSampler, scale: VoltageScale) -> Self {
        Self {
            gps,
            voltage,
            scale,
            last_volts: 0.0,
        }
    }

    pub async fn sample<S: SensorSuite>(&mut self, suite: &mut S) -> SensorSnapshot {
        let baro = suite.barometer().await;
        let altitude_m = if baro.valid {
            pressure_to_altitude(baro.pressure_pa)
        } else {
            None
        };
        let external_temp_c = suite.external_temperature().await;
        let internal_temp_c = suite.internal_temperature().await;
        let accel = suite.acceleration().await;

        // Voltage lags one cycle: pick up last cycle's conversion, then ask
        // for the next one.
        if let Some(raw) = self.voltage.try_take() {
            self.last_volts = self.scale.to_volts(raw);
        }
        self.voltage.start();

        SensorSnapshot {
            altitude_m,
            external_temp_c,
            internal_temp_c,
            pressure_valid: baro.valid,
            gps: self.gps.read(),
            accel,
            cutdown_voltage: self.last_volts,
        }
    }
}

// ────── 1976 US Standard Atmosphere ──────

/// Specific gas constant of dry air (J/kg·K).
const R_AIR: f32 = 287.053;
/// Standard gravity, signed so that the exponent below comes out right.
const G: f32 = -9.806_65;

struct Layer {
    /// Base height (m).
    base_m: f32,
    /// Pressure at the base (Pa).
    base_pa: f32,
    /// Lapse rate (K/m). Zero for isothermal layers.
    lapse: f32,
    /// Temperature at the base (K).
    base_k: f32,
}

const LAYERS: [Layer; 7] = [
    Layer { base_m: 0.0, base_pa: 101_325.0, lapse: -0.0065, base_k: 288.15 },
    Layer { base_m: 11_000.0, base_pa: 22_632.0, lapse: 0.0, base_k: 216.65 },
    Layer { base_m: 20_000.0, base_pa: 5_474.89, lapse: 0.001, base_k: 216.65 },
    Layer { base_m: 32_000.0, base_pa: 868.019, lapse: 0.0028, base_k: 228.65 },
    Layer { base_m: 47_000.0, base_pa: 110.906, lapse: 0.0, base_k: 270.65 },
    Layer { base_m: 51_000.0, base_pa: 66.9388, lapse: -0.0028, base_k: 270.65 },
    Layer { base_m: 71_000.0, base_pa: 3.956_42, lapse: -0.002, base_k: 214.65 },
];

/// Geopotential altitude (m) for a static pressure (Pa), using the layered
/// standard atmosphere up to ~84 km. `None` for non-positive or non-finite
/// pressure.
pub fn pressure_to_altitude(pressure_pa: f32) -> Option<f32> {
    if !pressure_pa.is_finite() || pressure_pa <= 0.0 {
        return None;
    }

    // highest layer whose base pressure is at or above the reading
    let layer = LAYERS
        .iter()
        .rev()
        .find(|l| pressure_pa <= l.base_pa)
        .unwrap_or(&LAYERS[0]);

    let ratio = pressure_pa / layer.base_pa;
    let alt = if layer.lapse == 0.0 {
        layer.base_m + (R_AIR * layer.base_k / G) * F32Ext::ln(ratio)
    } else {
        let exponent = layer.lapse * R_AIR / G;
        layer.base_m + (layer.base_k / layer.lapse) * (F32Ext::powf(ratio, exponent) - 1.0)
    };
    Some(alt)
}

/// TMP102 temperature register (12-bit two's complement, right aligned) to
/// degrees Celsius.
pub fn tmp102_counts_to_celsius(counts: u16) -> f32 {
    let signed = ((counts << 4) as i16) >> 4;
    signed as f32 * 0.0625
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn atmosphere_matches_reference_table() {
        let table = [
            (-100.0, 102_532.0),
            (0.0, 101_325.0),
            (1_000.0, 89_874.6),
            (3_000.0, 70_108.5),
            (7_000.0, 41_060.7),
            (11_000.0, 22_632.1),
            (15_000.0, 12_044.6),
            (20_000.0, 5_474.89),
            (25_000.0, 2_511.02),
            (30_000.0, 1_171.87),
            (35_000.0, 558.924),
            (40_000.0, 277.522),
        ];
        for (expected, pa) in table {
            let alt = pressure_to_altitude(pa).unwrap();
            assert!((alt - expected).abs() < 20.0, "{} Pa -> {} m, expected {} m", pa, alt, expected);
        }
    }

    #[test]
    fn atmosphere_rejects_nonsense() {
        assert_eq!(pressure_to_altitude(0.0), None);
        assert_eq!(pressure_to_altitude(-5.0), None);
        assert_eq!(pressure_to_altitude(f32::NAN), None);
    }

    #[test]
    fn tmp102_datasheet_table() {
        let table = [
            (0x7FF, 127.9375),
            (0x640, 100.0),
            (0x190, 25.0),
            (0x004, 0.25),
            (0x000, 0.0),
            (0xFFC, -0.25),
            (0xE70, -25.0),
            (0xC90, -55.0),
        ];
        for (counts, celsius) in table {
            assert_eq!(tmp102_counts_to_celsius(counts), celsius, "counts {:#05X}", counts);
        }
    }

    struct FixedSuite {
        baro: BaroReading,
        ext: Option<f32>,
        int: Option<f32>,
    }

    impl SensorSuite for FixedSuite {
        async fn barometer(&mut self) -> BaroReading {
            self.baro
        }
        async fn external_temperature(&mut self) -> Option<f32> {
            self.ext
        }
        async fn internal_temperature(&mut self) -> Option<f32> {
            self.int
        }
        async fn acceleration(&mut self) -> [i16; 3] {
            [12, -3, 2048]
        }
    }

    #[test]
    fn invalid_baro_forces_unknown_altitude() {
        let gps = SnapshotCell::new(GpsFix::default());
        let volts = VoltageSampler::new();
        let mut sampler = SensorSampler::new(&gps, &volts, VoltageScale::default());
        let mut suite = FixedSuite {
            baro: BaroReading {
                temperature_c: 20.0,
                pressure_pa: 101_325.0,
                valid: false,
            },
            ext: None,
            int: Some(21.5),
        };

        let snap = block_on(sampler.sample(&mut suite));
        assert_eq!(snap.altitude_m, None);
        assert!(!snap.pressure_valid);
        assert_eq!(snap.external_temp_c, None);
        assert_eq!(snap.internal_temp_c, Some(21.5));
        assert_eq!(snap.accel, [12, -3, 2048]);
    }

    #[test]
    fn sample_copies_gps_and_lags_voltage() {
        let gps = SnapshotCell::new(GpsFix::default());
        let volts = VoltageSampler::new();
        let mut sampler = SensorSampler::new(&gps, &volts, VoltageScale::default());
        let mut suite = FixedSuite {
            baro: BaroReading {
                temperature_c: 15.0,
                pressure_pa: 89_874.6,
                valid: true,
            },
            ext: Some(-41.3),
            int: Some(12.0),
        };
        let fix = GpsFix {
            satellites: 8,
            fix_valid: true,
            ..GpsFix::default()
        };
        gps.publish(fix);

        let first = block_on(sampler.sample(&mut suite));
        assert_eq!(first.gps, fix);
        assert_eq!(first.cutdown_voltage, 0.0);
        assert!((first.altitude_m.unwrap() - 1_000.0).abs() < 20.0);
        assert!(volts.is_pending());

        volts.complete(4095);
        let second = block_on(sampler.sample(&mut suite));
        assert!((second.cutdown_voltage - 13.2).abs() < 1e-3);

        // no new conversion: last value is held
        let third = block_on(sampler.sample(&mut suite));
        assert_eq!(third.cutdown_voltage, second.cutdown_voltage);
    }
}
