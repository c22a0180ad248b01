use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Instance, Spi};
use embassy_time::{Duration, Instant};

use balloon_payload::nor::SECTOR_SIZE;
use balloon_payload::{NorFlash, StorageError};

const CMD_PAGE_PROGRAM: u8 = 0x02;
const CMD_READ: u8 = 0x03;
const CMD_READ_STATUS1: u8 = 0x05;
const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_SECTOR_ERASE: u8 = 0x20;
const CMD_JEDEC_ID: u8 = 0x9F;

const STATUS_BUSY: u8 = 0x01;

const PAGE_SIZE: u32 = 256;

// datasheet maxima with some margin
const PROGRAM_TIMEOUT: Duration = Duration::from_millis(5);
const ERASE_TIMEOUT: Duration = Duration::from_millis(500);

/// W25Qxx SPI-NOR. Block layout lives in [`balloon_payload::NorBlocks`].
pub struct W25q<'d, T: Instance> {
    spi: Spi<'d, T, NoDma, NoDma>,
    cs: Output<'d, AnyPin>,
    /// Bytes; 0 until `init` identified the chip.
    size: u32,
}

impl<'d, T: Instance> W25q<'d, T> {
    pub fn new(spi: Spi<'d, T, NoDma, NoDma>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs, size: 0 }
    }

    /// Identify the chip and take its size from the JEDEC capacity code.
    pub fn init(&mut self) -> Result<[u8; 3], StorageError> {
        let mut id = [0u8; 3];
        self.transaction(&[CMD_JEDEC_ID], &[], &mut id)?;
        // capacity code is log2(bytes); reject unprogrammed or absent parts
        if !(16..=28).contains(&id[2]) {
            return Err(StorageError::Device);
        }
        // 3-byte addressing reaches 16 MiB
        self.size = 1u32 << id[2].min(24);
        balloon_payload::log_info!(
            "flash {} {} {}: {} bytes",
            id[0],
            id[1],
            id[2],
            self.size
        );
        Ok(id)
    }

    fn check(&self, addr: u32, len: usize) -> Result<(), StorageError> {
        match addr.checked_add(len as u32) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(StorageError::OutOfRange),
        }
    }

    fn transaction(&mut self, header: &[u8], out: &[u8], input: &mut [u8]) -> Result<(), StorageError> {
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(header)
            .and_then(|_| if out.is_empty() { Ok(()) } else { self.spi.blocking_write(out) })
            .and_then(|_| if input.is_empty() { Ok(()) } else { self.spi.blocking_read(input) });
        self.cs.set_high();
        res.map_err(|_| StorageError::Device)
    }

    fn wait_idle(&mut self, timeout: Duration) -> Result<(), StorageError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut status = [0u8; 1];
            self.transaction(&[CMD_READ_STATUS1], &[], &mut status)?;
            if status[0] & STATUS_BUSY == 0 {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(StorageError::Timeout);
            }
        }
    }

    fn addressed(cmd: u8, addr: u32) -> [u8; 4] {
        let a = addr.to_be_bytes();
        [cmd, a[1], a[2], a[3]]
    }
}

impl<'d, T: Instance> NorFlash for W25q<'d, T> {
    fn size(&self) -> u32 {
        self.size
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        self.check(addr, buf.len())?;
        self.transaction(&Self::addressed(CMD_READ, addr), &[], buf)
    }

    fn erase_sector(&mut self, addr: u32) -> Result<(), StorageError> {
        self.check(addr, SECTOR_SIZE as usize)?;
        self.transaction(&[CMD_WRITE_ENABLE], &[], &mut [])?;
        self.transaction(&Self::addressed(CMD_SECTOR_ERASE, addr), &[], &mut [])?;
        self.wait_idle(ERASE_TIMEOUT)
    }

    /// Split at page boundaries; a page program wraps within its page.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError> {
        self.check(addr, data.len())?;
        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let room = (PAGE_SIZE - addr % PAGE_SIZE) as usize;
            let (page, tail) = rest.split_at(room.min(rest.len()));
            self.transaction(&[CMD_WRITE_ENABLE], &[], &mut [])?;
            self.transaction(&Self::addressed(CMD_PAGE_PROGRAM, addr), page, &mut [])?;
            self.wait_idle(PROGRAM_TIMEOUT)?;
            addr += page.len() as u32;
            rest = tail;
        }
        Ok(())
    }
}
