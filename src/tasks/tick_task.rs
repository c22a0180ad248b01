use embassy_executor::task;
use embassy_stm32::gpio::{AnyPin, Level, Output};
use embassy_time::{Duration, Ticker};

use balloon_payload::config::TICK_HZ;
use balloon_payload::{Countdown, RttyModem};

/// Bit clock. Runs on the high-priority executor and does nothing but step
/// the modem and the countdown, so no lower-priority work can stretch a bit.
#[task]
pub async fn tick_task(
    mut rtty: Output<'static, AnyPin>,
    modem: &'static RttyModem,
    countdown: &'static Countdown,
) {
    let mut ticker = Ticker::every(Duration::from_hz(TICK_HZ as u64));
    loop {
        ticker.next().await;
        let level = if modem.tick().is_high() {
            Level::High
        } else {
            Level::Low
        };
        rtty.set_level(level);
        countdown.tick();
    }
}
