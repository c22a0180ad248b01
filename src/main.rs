#![no_std]
#![no_main]

mod board;
mod drivers;
mod tasks;
mod usb;

use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use {defmt_rtt as _, panic_probe as _};

use balloon_payload::config::{CUTDOWN_AFTER_MINUTES, TICK_HZ};
use balloon_payload::{
    log_error, log_info, Countdown, FlightComputer, FlightConfig, GpsFix, LogWriter, NorBlocks,
    RttyModem, SensorSampler, SnapshotCell, VoltageSampler,
};

use crate::board::{Board, BoardActuators, BoardWatchdog};
use crate::drivers::flash::W25q;
use crate::drivers::icm42688::Icm42688;
use crate::drivers::spl06::Spl06;
use crate::drivers::tmp102::Tmp102;
use crate::tasks::flight_loop::BoardSensors;
use crate::usb::{Frame, CONSOLE_DEPTH};

// ── Shared services ───────────────────────────────────────────────────────────
static MODEM: RttyModem = RttyModem::new();
static COUNTDOWN: Countdown = Countdown::from_minutes(CUTDOWN_AFTER_MINUTES, TICK_HZ);
static GPS_FIX: SnapshotCell<GpsFix> = SnapshotCell::new(GpsFix::NONE);
static VOLTAGE: VoltageSampler = VoltageSampler::new();

// Sentences echoed to the USB console; the flight loop never waits on it.
static CONSOLE: Channel<CriticalSectionRawMutex, Frame, CONSOLE_DEPTH> = Channel::new();

// ── Bit clock executor ────────────────────────────────────────────────────────
// Preempts everything else so RTTY bit timing never slips.
static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn UART5() {
    EXECUTOR_HIGH.on_interrupt()
}

bind_interrupts!(struct Irqs {
    I2C1_EV  => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER  => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
    USART3   => embassy_stm32::usart::InterruptHandler<peripherals::USART3>;
});

const TMP102_EXTERNAL: u8 = 0x48;
const TMP102_INTERNAL: u8 = 0x49;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;
    log_info!("boot: cutdown armed for {} min", CUTDOWN_AFTER_MINUTES);

    // 2. Actuators first so every output is driven low from here on
    let actuators = BoardActuators::new(
        Output::new(p.PB1.degrade(), Level::Low, Speed::Low),
        Output::new(p.PA3.degrade(), Level::Low, Speed::Low),
        Output::new(p.PA2.degrade(), Level::Low, Speed::Low),
    );

    // 3. Bit clock on the high-priority executor, RTTY idles at mark
    let rtty = Output::new(p.PB0.degrade(), Level::High, Speed::Low);
    interrupt::UART5.set_priority(Priority::P6);
    let high = EXECUTOR_HIGH.start(interrupt::UART5);
    high.spawn(tasks::tick_task::tick_task(rtty, &MODEM, &COUNTDOWN)).unwrap();

    // 4. USB (CDC-ACM console)
    let (usb_dev, usb_serial) = usb::init(p.USB_OTG_FS, p.PA12, p.PA11);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();
    spawner.spawn(usb::console_task(usb_serial, CONSOLE.receiver())).unwrap();

    // 5. I2C1 @ 400 kHz: SPL06 + two TMP102 (SCL=PB8, SDA=PB9)
    let mut i2c = I2c::new(
        p.I2C1,
        p.PB8, p.PB9,
        Irqs,
        p.DMA1_CH7,
        p.DMA1_CH0,
        TimeHertz(400_000),
        Default::default(),
    );
    let mut baro = Spl06::new();
    if baro.init(&mut i2c).await.is_err() {
        log_error!("spl06 init failed, altitude unknown");
    }

    // 6. SPI1 @ 10 MHz: ICM-42688 (SCK=PA5, MOSI=PA7, MISO=PA6, CS=PB12)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(10_000_000);
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_config);
    let cs_imu = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);
    let mut imu = Icm42688::new(spi, cs_imu);
    Timer::after(Duration::from_millis(100)).await;
    if imu.init().await.is_err() {
        log_error!("icm42688 init failed");
    }

    // 7. SPI3 @ 20 MHz: W25Q flash (SCK=PC10, MOSI=PC12, MISO=PC11, CS=PA15)
    let mut flash_config = SpiConfig::default();
    flash_config.frequency = TimeHertz(20_000_000);
    let flash_spi = Spi::new(p.SPI3, p.PC10, p.PC12, p.PC11, NoDma, NoDma, flash_config);
    let cs_flash = Output::new(p.PA15.degrade(), Level::High, Speed::VeryHigh);
    let mut flash = W25q::new(flash_spi, cs_flash);
    if flash.init().is_err() {
        log_error!("flash not found, logging disabled");
    }

    // 8. GPS USART3 @ 9600 (TX=PB10, RX=PB11)
    let mut gps_config = UsartConfig::default();
    gps_config.baudrate = 9_600;
    let gps_uart = Uart::new(
        p.USART3, p.PB11, p.PB10,
        Irqs,
        p.DMA1_CH3, p.DMA1_CH1,
        gps_config,
    ).unwrap();
    spawner.spawn(tasks::gps_task::gps_task(gps_uart, &GPS_FIX)).unwrap();

    // 9. Cutdown voltage on PC0
    spawner.spawn(tasks::adc_task::adc_task(p.ADC1, p.PC0, &VOLTAGE)).unwrap();

    // 10. Flight loop. The watchdog starts here: from now on the loop must
    //     complete at least once per timeout.
    let config = FlightConfig::default();
    let sensors = BoardSensors {
        i2c,
        baro,
        external: Tmp102::new(TMP102_EXTERNAL),
        internal: Tmp102::new(TMP102_INTERNAL),
        imu,
        accel: [0; 3],
    };
    let sampler = SensorSampler::new(&GPS_FIX, &VOLTAGE, config.voltage);
    let watchdog = BoardWatchdog::start(p.IWDG);
    let computer = FlightComputer::new(
        config,
        &MODEM,
        &COUNTDOWN,
        LogWriter::new(NorBlocks::new(flash)),
        actuators,
        watchdog,
    );
    spawner.spawn(tasks::flight_loop::flight_loop(
        sensors,
        sampler,
        computer,
        CONSOLE.sender(),
    )).unwrap();

    // 11. Heartbeat LED (PC13)
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);
    loop {
        led.toggle();
        Timer::after(Duration::from_millis(500)).await;
    }
}
