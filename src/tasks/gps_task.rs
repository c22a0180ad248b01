use embassy_executor::task;
use embassy_futures::select::{select, Either};
use embassy_stm32::peripherals::{DMA1_CH1, DMA1_CH3, USART3};
use embassy_stm32::usart::Uart;
use embassy_time::{Duration, Timer};

use balloon_payload::{GpsFix, NmeaIngest, SnapshotCell};

/// GPS task: feeds USART3 bursts through the NMEA ingest and publishes every
/// validated fix.
#[task]
pub async fn gps_task(
    mut gps_uart: Uart<'static, USART3, DMA1_CH3, DMA1_CH1>,
    fix: &'static SnapshotCell<GpsFix>,
) {
    let mut ingest = NmeaIngest::new();
    let mut buf = [0u8; 256];
    let mut reported = ingest.stats;

    loop {
        // receivers talk at 1 Hz; a line burst ends with an idle gap
        match select(
            gps_uart.read_until_idle(&mut buf),
            Timer::after(Duration::from_millis(1100)),
        )
        .await
        {
            Either::First(Ok(n)) => {
                ingest.push_bytes(&buf[..n], fix);
            }
            Either::First(Err(_)) => {
                balloon_payload::log_debug!("gps: uart error");
            }
            Either::Second(_) => {
                balloon_payload::log_debug!("gps: no data");
            }
        }

        let stats = ingest.stats;
        if stats.checksum_errors != reported.checksum_errors || stats.overflows != reported.overflows {
            balloon_payload::log_warn!(
                "gps: {} ok, {} bad checksum, {} overflow",
                stats.accepted,
                stats.checksum_errors,
                stats.overflows
            );
            reported = stats;
        }
    }
}
