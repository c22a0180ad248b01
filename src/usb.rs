use core::fmt::Write;

use embassy_stm32::usb_otg::{self, Driver};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

use balloon_payload::config::{CALLSIGN, FRAME_CAPACITY};

bind_interrupts!(pub struct Irqs {
    OTG_FS => usb_otg::InterruptHandler<peripherals::USB_OTG_FS>;
});

pub type UsbDriver = Driver<'static, peripherals::USB_OTG_FS>;
pub type UsbSerial<'a> = CdcAcmClass<'a, UsbDriver>;

/// One telemetry sentence on its way to the console.
pub type Frame = heapless::Vec<u8, FRAME_CAPACITY>;
pub const CONSOLE_DEPTH: usize = 2;

const MAX_PACKET: usize = 64;

struct UsbResources {
    config_desc: [u8; 256],
    bos_desc: [u8; 256],
    control_buf: [u8; 64],
    ep_out_buffer: [u8; 256],
}

static USB_RES: StaticCell<UsbResources> = StaticCell::new();
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

pub fn init(
    usb_periph: peripherals::USB_OTG_FS,
    pa12: peripherals::PA12,
    pa11: peripherals::PA11,
) -> (UsbDevice<'static, UsbDriver>, UsbSerial<'static>) {
    let UsbResources {
        config_desc,
        bos_desc,
        control_buf,
        ep_out_buffer,
    } = USB_RES.init(UsbResources {
        config_desc: [0; 256],
        bos_desc: [0; 256],
        control_buf: [0; 64],
        ep_out_buffer: [0; 256],
    });

    let mut usb_config = usb_otg::Config::default();
    usb_config.vbus_detection = false;
    let driver = Driver::new_fs(usb_periph, Irqs, pa12, pa11, ep_out_buffer, usb_config);

    let mut config = Config::new(0xc0de, 0xcafe);
    config.manufacturer = Some("BUSEDS");
    config.product = Some("Balloon payload console");
    config.serial_number = Some(CALLSIGN);

    let mut builder = Builder::new(driver, config, config_desc, bos_desc, &mut [], control_buf);
    let state = CDC_STATE.init(State::new());
    let class = CdcAcmClass::new(&mut builder, state, MAX_PACKET as u16);
    let usb = builder.build();

    (usb, class)
}

async fn write_all(serial: &mut UsbSerial<'static>, data: &[u8]) -> Result<(), EndpointError> {
    for chunk in data.chunks(MAX_PACKET) {
        serial.write_packet(chunk).await?;
    }
    // a full last packet needs a ZLP to end the transfer
    if data.len() % MAX_PACKET == 0 {
        serial.write_packet(&[]).await?;
    }
    Ok(())
}

/// Echo every sentence to a host terminal. Frames queued while nothing is
/// attached are dropped by the sender, never waited for.
#[embassy_executor::task]
pub async fn console_task(
    mut serial: UsbSerial<'static>,
    frames: Receiver<'static, CriticalSectionRawMutex, Frame, CONSOLE_DEPTH>,
) -> ! {
    loop {
        serial.wait_connection().await;
        balloon_payload::log_info!("usb console attached");

        let mut banner = heapless::String::<64>::new();
        let _ = write!(banner, "[{}] telemetry console\r\n", CALLSIGN);
        let _ = write_all(&mut serial, banner.as_bytes()).await;

        loop {
            let frame = frames.receive().await;
            if !serial.dtr() {
                continue;
            }
            if write_all(&mut serial, &frame).await.is_err() {
                break;
            }
        }
        balloon_payload::log_info!("usb console detached");
    }
}
