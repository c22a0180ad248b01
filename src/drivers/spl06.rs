use embassy_stm32::i2c::{Error, I2c, Instance, RxDma, TxDma};
use embassy_time::{Duration, Timer};

use balloon_payload::BaroReading;

const ADDR: u8 = 0x76;
const REG_PRESS_DATA: u8 = 0x00;
const REG_TEMP_DATA: u8 = 0x03;
const REG_PRS_CFG: u8 = 0x06;
const REG_TMP_CFG: u8 = 0x07;
const REG_MEAS_CFG: u8 = 0x08;
const REG_RESET: u8 = 0x0C;
const REG_CHIP_ID: u8 = 0x0D;
const REG_COEF: u8 = 0x10;

const CHIP_ID: u8 = 0x10;

/// 8x oversampling scale factor (datasheet table 4).
const SCALE_8X: f32 = 7_864_320.0;

#[derive(Default, Debug, Clone, Copy)]
struct Coeffs {
    c0: i16,
    c1: i16,
    c00: i32,
    c10: i32,
    c01: i16,
    c11: i16,
    c20: i16,
    c21: i16,
    c30: i16,
}

/// Sign-extend the low `bits` of `raw`.
fn sext(raw: i32, bits: u32) -> i32 {
    let shift = 32 - bits;
    (raw << shift) >> shift
}

pub struct Spl06 {
    coeffs: Coeffs,
    ready: bool,
}

impl Spl06 {
    pub fn new() -> Self {
        Self {
            coeffs: Coeffs::default(),
            ready: false,
        }
    }

    pub async fn init<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), Error> {
        // soft reset
        i2c.blocking_write(ADDR, &[REG_RESET, 0x09])?;
        Timer::after(Duration::from_millis(50)).await;

        let mut id = [0u8; 1];
        i2c.blocking_write_read(ADDR, &[REG_CHIP_ID], &mut id)?;
        if id[0] != CHIP_ID {
            balloon_payload::log_warn!("spl06: unexpected chip id {}", id[0]);
        }

        self.read_coeffs(i2c)?;

        // pressure: 4 meas/s, 8x oversampling
        i2c.blocking_write(ADDR, &[REG_PRS_CFG, 0x23])?;
        // temperature: external sensor, 4 meas/s, 8x oversampling
        i2c.blocking_write(ADDR, &[REG_TMP_CFG, 0xA3])?;
        // continuous pressure and temperature
        i2c.blocking_write(ADDR, &[REG_MEAS_CFG, 0x07])?;
        Timer::after(Duration::from_millis(50)).await;

        self.ready = true;
        Ok(())
    }

    fn read_24<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        i2c: &mut I2c<'_, T, Tx, Rx>,
        reg: u8,
    ) -> Result<i32, Error> {
        let mut buf = [0u8; 3];
        i2c.blocking_write_read(ADDR, &[reg], &mut buf)?;
        let raw = (buf[0] as i32) << 16 | (buf[1] as i32) << 8 | buf[2] as i32;
        Ok(sext(raw, 24))
    }

    fn read_coeffs<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<(), Error> {
        let mut b = [0u8; 18];
        i2c.blocking_write_read(ADDR, &[REG_COEF], &mut b)?;
        let b: [i32; 18] = b.map(|x| x as i32);

        self.coeffs = Coeffs {
            c0: sext(b[0] << 4 | b[1] >> 4, 12) as i16,
            c1: sext((b[1] & 0x0F) << 8 | b[2], 12) as i16,
            c00: sext(b[3] << 12 | b[4] << 4 | b[5] >> 4, 20),
            c10: sext((b[5] & 0x0F) << 16 | b[6] << 8 | b[7], 20),
            c01: (b[8] << 8 | b[9]) as i16,
            c11: (b[10] << 8 | b[11]) as i16,
            c20: (b[12] << 8 | b[13]) as i16,
            c21: (b[14] << 8 | b[15]) as i16,
            c30: (b[16] << 8 | b[17]) as i16,
        };
        Ok(())
    }

    /// Compensated temperature and pressure. Invalid until `init` succeeded.
    pub fn read<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &mut self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<BaroReading, Error> {
        if !self.ready {
            return Ok(BaroReading::default());
        }

        let p_sc = Self::read_24(i2c, REG_PRESS_DATA)? as f32 / SCALE_8X;
        let t_sc = Self::read_24(i2c, REG_TEMP_DATA)? as f32 / SCALE_8X;
        let c = &self.coeffs;

        let temperature_c = c.c0 as f32 * 0.5 + c.c1 as f32 * t_sc;
        let pressure_pa = c.c00 as f32
            + p_sc * (c.c10 as f32 + p_sc * (c.c20 as f32 + p_sc * c.c30 as f32))
            + t_sc * c.c01 as f32
            + t_sc * p_sc * (c.c11 as f32 + p_sc * c.c21 as f32);

        Ok(BaroReading {
            temperature_c,
            pressure_pa,
            valid: pressure_pa.is_finite() && pressure_pa > 0.0,
        })
    }
}
