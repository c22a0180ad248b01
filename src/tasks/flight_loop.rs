use embassy_executor::task;
use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::{DMA1_CH0, DMA1_CH7, I2C1, SPI1, SPI3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{Duration, Ticker};

use balloon_payload::config::CONTROL_LOOP_HZ;
use balloon_payload::{
    BaroReading, FlightComputer, FrameOutcome, NorBlocks, SensorSampler, SensorSuite,
};

use crate::board::{BoardActuators, BoardWatchdog};
use crate::drivers::flash::W25q;
use crate::drivers::icm42688::Icm42688;
use crate::drivers::spl06::Spl06;
use crate::drivers::tmp102::Tmp102;
use crate::usb::{Frame, CONSOLE_DEPTH};

pub type PayloadComputer =
    FlightComputer<'static, NorBlocks<W25q<'static, SPI3>>, BoardActuators, BoardWatchdog>;

/// The sensors on I2C1 and SPI1, read in place each cycle.
pub struct BoardSensors {
    pub i2c: I2c<'static, I2C1, DMA1_CH7, DMA1_CH0>,
    pub baro: Spl06,
    pub external: Tmp102,
    pub internal: Tmp102,
    pub imu: Icm42688<'static, SPI1>,
    pub accel: [i16; 3],
}

impl SensorSuite for BoardSensors {
    async fn barometer(&mut self) -> BaroReading {
        match self.baro.read(&mut self.i2c) {
            Ok(reading) => reading,
            Err(_) => {
                balloon_payload::log_debug!("spl06 read failed");
                BaroReading::default()
            }
        }
    }

    async fn external_temperature(&mut self) -> Option<f32> {
        self.external.read_celsius(&mut self.i2c).ok()
    }

    async fn internal_temperature(&mut self) -> Option<f32> {
        self.internal.read_celsius(&mut self.i2c).ok()
    }

    async fn acceleration(&mut self) -> [i16; 3] {
        // keep the last good sample on a bus error
        if let Ok(a) = self.imu.read_accel() {
            self.accel = a;
        }
        self.accel
    }
}

/// Foreground control loop at `CONTROL_LOOP_HZ`.
#[task]
pub async fn flight_loop(
    mut sensors: BoardSensors,
    mut sampler: SensorSampler<'static>,
    mut computer: PayloadComputer,
    console: Sender<'static, CriticalSectionRawMutex, Frame, CONSOLE_DEPTH>,
) {
    let mut ticker = Ticker::every(Duration::from_hz(CONTROL_LOOP_HZ));
    loop {
        ticker.next().await;

        let snapshot = sampler.sample(&mut sensors).await;
        let report = computer.run_cycle(&snapshot);

        if matches!(report.frame, FrameOutcome::NotBuilt(_)) {
            continue;
        }
        if let Ok(frame) = Frame::from_slice(computer.last_frame()) {
            let _ = console.try_send(frame);
        }
    }
}
