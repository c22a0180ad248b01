use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};
use embassy_time::{Duration, Timer};

const REG_DEVICE_CONFIG: u8 = 0x11;
const REG_ACCEL_DATA_X1: u8 = 0x1F;
const REG_PWR_MGMT0: u8 = 0x4E;
const REG_ACCEL_CONFIG0: u8 = 0x50;
const REG_WHO_AM_I: u8 = 0x75;

const WHO_AM_I: u8 = 0x47;

/// ICM-42688 used as a plain accelerometer: ±16 g, 2048 LSB/g.
pub struct Icm42688<'d, T: Instance> {
    spi: Spi<'d, T, NoDma, NoDma>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance> Icm42688<'d, T> {
    pub fn new(spi: Spi<'d, T, NoDma, NoDma>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        self.cs.set_low();
        let res = self.spi.blocking_write(&[reg & 0x7F, value]);
        self.cs.set_high();
        res
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        let tx = [reg | 0x80, 0x00];
        let mut rx = [0u8; 2];
        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();
        res?;
        Ok(rx[1])
    }

    pub async fn init(&mut self) -> Result<(), Error> {
        self.write_reg(REG_DEVICE_CONFIG, 0x01)?;
        Timer::after(Duration::from_millis(10)).await;

        let id = self.read_reg(REG_WHO_AM_I)?;
        if id != WHO_AM_I {
            balloon_payload::log_warn!("icm42688: unexpected who_am_i {}", id);
        }

        // ±16 g, 50 Hz ODR
        self.write_reg(REG_ACCEL_CONFIG0, 0x09)?;
        // accel low-noise, gyro off
        self.write_reg(REG_PWR_MGMT0, 0x03)?;
        Timer::after(Duration::from_millis(50)).await;
        Ok(())
    }

    pub fn read_accel(&mut self) -> Result<[i16; 3], Error> {
        let mut tx = [0u8; 7];
        tx[0] = REG_ACCEL_DATA_X1 | 0x80;
        let mut rx = [0u8; 7];

        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();
        res?;

        Ok([
            i16::from_be_bytes([rx[1], rx[2]]),
            i16::from_be_bytes([rx[3], rx[4]]),
            i16::from_be_bytes([rx[5], rx[6]]),
        ])
    }
}
