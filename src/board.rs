use embassy_stm32::gpio::{AnyPin, Level, Output};
use embassy_stm32::peripherals::IWDG;
use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_stm32::Config;

use balloon_payload::config::WATCHDOG_TIMEOUT_US;
use balloon_payload::{Actuators, Watchdog};

// Pin map (JHEF405 pads):
//   RTTY out     PB0  (MOTOR1)
//   cutdown      PB1  (MOTOR2)
//   heater       PA3  (MOTOR3)
//   aux power    PA2  (MOTOR4)
//   cutdown V    PC0  (ADC1_IN10, 10k/30k divider)
//   GPS          USART3 PB11/PB10
//   baro + temps I2C1 PB8/PB9
//   IMU          SPI1 PA5/PA7/PA6, CS PB12
//   flash        SPI3 PC10/PC12/PC11, CS PA15

pub struct Board {
    pub p: embassy_stm32::Peripherals,
}

impl Board {
    pub fn init() -> Self {
        let mut config = Config::default();
        config.rcc.hse = Some(Hse {
            freq: TimeHertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL168,
            divp: Some(PllPDiv::DIV2), // 168 MHz
            divq: Some(PllQDiv::DIV7), // 48 MHz USB
            divr: None,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;

        let p = embassy_stm32::init(config);

        Self { p }
    }
}

/// Cutdown, heater and auxiliary power switches. All start de-energized.
pub struct BoardActuators {
    cutdown: Output<'static, AnyPin>,
    heater: Output<'static, AnyPin>,
    aux_power: Output<'static, AnyPin>,
}

impl BoardActuators {
    pub fn new(
        mut cutdown: Output<'static, AnyPin>,
        mut heater: Output<'static, AnyPin>,
        mut aux_power: Output<'static, AnyPin>,
    ) -> Self {
        cutdown.set_low();
        heater.set_low();
        aux_power.set_low();
        Self {
            cutdown,
            heater,
            aux_power,
        }
    }
}

fn level(on: bool) -> Level {
    if on {
        Level::High
    } else {
        Level::Low
    }
}

impl Actuators for BoardActuators {
    fn set_cutdown(&mut self, on: bool) {
        self.cutdown.set_level(level(on));
    }

    fn set_heater(&mut self, on: bool) {
        self.heater.set_level(level(on));
    }

    fn set_aux_power(&mut self, on: bool) {
        self.aux_power.set_level(level(on));
    }
}

/// Independent watchdog. Once started it cannot be stopped.
pub struct BoardWatchdog {
    iwdg: IndependentWatchdog<'static, IWDG>,
}

impl BoardWatchdog {
    pub fn start(iwdg: IWDG) -> Self {
        let mut iwdg = IndependentWatchdog::new(iwdg, WATCHDOG_TIMEOUT_US);
        iwdg.unleash();
        balloon_payload::log_info!("watchdog armed: {} us", WATCHDOG_TIMEOUT_US);
        Self { iwdg }
    }
}

impl Watchdog for BoardWatchdog {
    fn feed(&mut self) {
        self.iwdg.pet();
    }
}
