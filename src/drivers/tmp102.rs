use embassy_stm32::i2c::{Error, I2c, Instance, RxDma, TxDma};

use balloon_payload::sensors::tmp102_counts_to_celsius;

const REG_TEMPERATURE: u8 = 0x00;

/// TMP102 in its power-on default mode (continuous, 4 Hz).
pub struct Tmp102 {
    addr: u8,
}

impl Tmp102 {
    /// `addr` is the 7-bit address selected by the ADD0 strap (0x48..=0x4B).
    pub const fn new(addr: u8) -> Self {
        Self { addr }
    }

    pub fn read_celsius<T: Instance, Tx: TxDma<T>, Rx: RxDma<T>>(
        &self,
        i2c: &mut I2c<'_, T, Tx, Rx>,
    ) -> Result<f32, Error> {
        let mut buf = [0u8; 2];
        i2c.blocking_write_read(self.addr, &[REG_TEMPERATURE], &mut buf)?;
        // 12-bit, MSB first, left aligned
        let counts = (buf[0] as u16) << 4 | (buf[1] as u16) >> 4;
        Ok(tmp102_counts_to_celsius(counts))
    }
}
