use embassy_executor::task;
use embassy_stm32::adc::Adc;
use embassy_stm32::peripherals::{ADC1, PC0};
use embassy_time::Delay;

use balloon_payload::VoltageSampler;

/// One conversion per request. The ADC is powered only for the conversion:
/// it is brought up here and shut down when `adc` is dropped.
#[task]
pub async fn adc_task(mut adc1: ADC1, mut pin: PC0, sampler: &'static VoltageSampler) {
    loop {
        sampler.wait_request().await;
        let raw = {
            let mut adc = Adc::new(&mut adc1, &mut Delay);
            adc.read(&mut pin)
        };
        sampler.complete(raw);
    }
}
