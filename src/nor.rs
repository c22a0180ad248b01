//! Block view of a SPI-NOR flash.
//!
//! NOR programming only clears bits and erases whole 4 KiB sectors, so the
//! cursor block and the payload blocks are stored differently:
//!
//! - The cursor block is a journal of 16-byte records over two sectors. Each
//!   write programs the next free record. A sector is erased only when the
//!   other one is full, so the newest record survives a reset at any point.
//!   Each journal sector is erased once every 512 cursor writes.
//! - Payload block `n` lives at `2 * SECTOR_SIZE + (n - 1) * BLOCK_SIZE`.
//!   Writing the first block of a sector erases the sector; rewriting an
//!   already programmed block rewrites its sector around it.

use crate::blackbox::{BlockDevice, CURSOR_LEN};
use crate::config::{BLOCK_SIZE, CURSOR_BLOCK, FIRST_PAYLOAD_BLOCK};
use crate::error::StorageError;

pub const SECTOR_SIZE: u32 = 4096;

const ERASED: u8 = 0xFF;
const JOURNAL_SECTORS: u32 = 2;
const RECORD_LEN: usize = 16;
const RECORDS_PER_SECTOR: u32 = SECTOR_SIZE / RECORD_LEN as u32;
const PAYLOAD_BASE: u32 = JOURNAL_SECTORS * SECTOR_SIZE;

/// Raw NOR chip access.
pub trait NorFlash {
    /// Total size in bytes, 0 when no chip answered.
    fn size(&self) -> u32;
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError>;
    /// Erase the sector starting at `addr` to `0xFF`.
    fn erase_sector(&mut self, addr: u32) -> Result<(), StorageError>;
    /// Program `data` at `addr`. Only clears bits.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError>;
}

/// Sequence number and value, then both complemented. Erased, zeroed and
/// torn records all fail the complement check.
fn encode_record(seq: u32, value: u32) -> [u8; RECORD_LEN] {
    let mut r = [0u8; RECORD_LEN];
    r[0..4].copy_from_slice(&seq.to_le_bytes());
    r[4..8].copy_from_slice(&value.to_le_bytes());
    r[8..12].copy_from_slice(&(!seq).to_le_bytes());
    r[12..16].copy_from_slice(&(!value).to_le_bytes());
    r
}

fn decode_record(r: &[u8]) -> Option<(u32, u32)> {
    let word = |i: usize| u32::from_le_bytes([r[i], r[i + 1], r[i + 2], r[i + 3]]);
    let (seq, value) = (word(0), word(4));
    (word(8) == !seq && word(12) == !value).then_some((seq, value))
}

fn payload_addr(block: u32) -> u32 {
    PAYLOAD_BASE + (block - FIRST_PAYLOAD_BLOCK) * BLOCK_SIZE as u32
}

#[derive(Debug, Clone, Copy)]
struct Journal {
    /// Sector receiving records.
    sector: u32,
    /// Next unprogrammed record in `sector`.
    next: u32,
    seq: u32,
    value: Option<u32>,
}

/// [`BlockDevice`] over a [`NorFlash`] chip.
///
/// Writing the first block of a sector discards whatever followed it in that
/// sector, which is never live data for an append-only log.
pub struct NorBlocks<F> {
    flash: F,
    /// `None` until the journal has been scanned.
    journal: Option<Journal>,
    sector: [u8; SECTOR_SIZE as usize],
}

impl<F: NorFlash> NorBlocks<F> {
    pub fn new(flash: F) -> Self {
        Self {
            flash,
            journal: None,
            sector: [ERASED; SECTOR_SIZE as usize],
        }
    }

    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn journal(&mut self) -> Result<Journal, StorageError> {
        if let Some(j) = self.journal {
            return Ok(j);
        }
        let j = self.scan()?;
        self.journal = Some(j);
        Ok(j)
    }

    /// Find the newest valid record, and the first slot after any
    /// programmed bytes in its sector.
    fn scan(&mut self) -> Result<Journal, StorageError> {
        let mut newest: Option<(u32, u32, u32)> = None;
        let mut used = [0u32; JOURNAL_SECTORS as usize];

        for sector in 0..JOURNAL_SECTORS {
            self.flash.read(sector * SECTOR_SIZE, &mut self.sector)?;
            for (slot, record) in self.sector.chunks_exact(RECORD_LEN).enumerate() {
                if record.iter().any(|&b| b != ERASED) {
                    used[sector as usize] = slot as u32 + 1;
                }
                if let Some((seq, value)) = decode_record(record) {
                    if newest.map_or(true, |(s, _, _)| seq > s) {
                        newest = Some((seq, value, sector));
                    }
                }
            }
        }

        Ok(match newest {
            Some((seq, value, sector)) => Journal {
                sector,
                next: used[sector as usize],
                seq,
                value: Some(value),
            },
            // nothing stored: the first write rotates into sector 0
            None => Journal {
                sector: JOURNAL_SECTORS - 1,
                next: RECORDS_PER_SECTOR,
                seq: 0,
                value: None,
            },
        })
    }

    fn read_cursor(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
        let j = self.journal()?;
        buf.fill(ERASED);
        if let Some(value) = j.value {
            let n = buf.len().min(CURSOR_LEN);
            buf[..n].copy_from_slice(&value.to_le_bytes()[..n]);
        }
        Ok(())
    }

    fn write_cursor(&mut self, value: u32) -> Result<(), StorageError> {
        let mut j = self.journal()?;
        if j.next >= RECORDS_PER_SECTOR {
            let other = (j.sector + 1) % JOURNAL_SECTORS;
            self.flash.erase_sector(other * SECTOR_SIZE)?;
            j.sector = other;
            j.next = 0;
        }

        let addr = j.sector * SECTOR_SIZE + j.next * RECORD_LEN as u32;
        j.seq = j.seq.wrapping_add(1);
        let record = encode_record(j.seq, value);
        // a failed program may still have cleared bits: never reuse the slot
        // or its sequence number
        j.next += 1;
        self.journal = Some(j);
        self.flash.program(addr, &record)?;

        j.value = Some(value);
        self.journal = Some(j);
        Ok(())
    }

    fn write_payload(&mut self, block: u32, data: &[u8]) -> Result<(), StorageError> {
        let addr = payload_addr(block);
        let offset = (addr % SECTOR_SIZE) as usize;
        let base = addr - offset as u32;
        if offset == 0 {
            self.flash.erase_sector(base)?;
            return self.flash.program(addr, data);
        }

        let current = &mut self.sector[..BLOCK_SIZE];
        self.flash.read(addr, current)?;
        if current.iter().all(|&b| b == ERASED) {
            return self.flash.program(addr, data);
        }

        log_warn!("block {} already programmed, rewriting its sector", block);
        self.flash.read(base, &mut self.sector)?;
        let slot = &mut self.sector[offset..offset + BLOCK_SIZE];
        slot.fill(ERASED);
        slot[..data.len()].copy_from_slice(data);
        self.flash.erase_sector(base)?;
        for (i, chunk) in self.sector.chunks(BLOCK_SIZE).enumerate() {
            if chunk.iter().any(|&b| b != ERASED) {
                self.flash.program(base + (i * BLOCK_SIZE) as u32, chunk)?;
            }
        }
        Ok(())
    }
}

impl<F: NorFlash> BlockDevice for NorBlocks<F> {
    fn read(&mut self, block: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        if block >= self.capacity() || buf.len() > BLOCK_SIZE {
            return Err(StorageError::OutOfRange);
        }
        if block == CURSOR_BLOCK {
            self.read_cursor(buf)
        } else {
            self.flash.read(payload_addr(block), buf)
        }
    }

    /// The cursor block keeps only the first [`CURSOR_LEN`] bytes of `data`.
    fn write(&mut self, block: u32, data: &[u8]) -> Result<(), StorageError> {
        if block >= self.capacity() || data.len() > BLOCK_SIZE {
            return Err(StorageError::OutOfRange);
        }
        if block == CURSOR_BLOCK {
            let raw = data.get(..CURSOR_LEN).ok_or(StorageError::OutOfRange)?;
            self.write_cursor(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        } else {
            self.write_payload(block, data)
        }
    }

    fn capacity(&mut self) -> u32 {
        match self.flash.size().checked_sub(PAYLOAD_BASE) {
            Some(payload) => FIRST_PAYLOAD_BLOCK + payload / BLOCK_SIZE as u32,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::vec;
    use std::vec::Vec;

    use super::*;
    use crate::blackbox::LogWriter;
    use crate::error::LogError;

    /// RAM model of a NOR chip: programming ANDs bits in, erase sets 0xFF.
    struct RamNor {
        mem: Vec<u8>,
        erases: Vec<u32>,
        /// Tear the next program at this address after 8 bytes.
        tear_at: Option<u32>,
    }

    impl RamNor {
        fn new(size: usize) -> Self {
            Self {
                mem: vec![ERASED; size],
                erases: Vec::new(),
                tear_at: None,
            }
        }

        fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
            let start = addr as usize;
            let end = start + len;
            if end > self.mem.len() {
                return Err(StorageError::OutOfRange);
            }
            Ok(start..end)
        }
    }

    impl NorFlash for RamNor {
        fn size(&self) -> u32 {
            self.mem.len() as u32
        }

        fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
            let r = self.range(addr, buf.len())?;
            buf.copy_from_slice(&self.mem[r]);
            Ok(())
        }

        fn erase_sector(&mut self, addr: u32) -> Result<(), StorageError> {
            assert_eq!(addr % SECTOR_SIZE, 0);
            let r = self.range(addr, SECTOR_SIZE as usize)?;
            self.mem[r].fill(ERASED);
            self.erases.push(addr);
            Ok(())
        }

        fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError> {
            let r = self.range(addr, data.len())?;
            let torn = self.tear_at == Some(addr);
            for (i, (cell, &b)) in self.mem[r].iter_mut().zip(data).enumerate() {
                if torn && i == 8 {
                    self.tear_at = None;
                    return Err(StorageError::Device);
                }
                *cell &= b;
            }
            Ok(())
        }
    }

    fn stored_cursor(dev: &mut NorBlocks<RamNor>) -> u32 {
        let mut raw = [0u8; CURSOR_LEN];
        dev.read(CURSOR_BLOCK, &mut raw).unwrap();
        u32::from_le_bytes(raw)
    }

    fn remount(dev: NorBlocks<RamNor>) -> NorBlocks<RamNor> {
        NorBlocks::new(dev.into_inner())
    }

    #[test]
    fn fresh_chip_reads_erased_cursor() {
        let mut dev = NorBlocks::new(RamNor::new(64 * 1024));
        assert_eq!(dev.capacity(), 1 + (64 * 1024 - 8192) / 512);
        assert_eq!(stored_cursor(&mut dev), u32::MAX);
    }

    #[test]
    fn cursor_survives_remount() {
        let mut dev = NorBlocks::new(RamNor::new(64 * 1024));
        for v in [5u32, 6, 7] {
            dev.write(CURSOR_BLOCK, &v.to_le_bytes()).unwrap();
        }
        let mut dev = remount(dev);
        assert_eq!(stored_cursor(&mut dev), 7);
    }

    #[test]
    fn journal_erases_once_per_filled_sector() {
        let mut dev = NorBlocks::new(RamNor::new(64 * 1024));
        for v in 2..1002u32 {
            dev.write(CURSOR_BLOCK, &v.to_le_bytes()).unwrap();
        }
        // rotations at writes 1, 257, 513 and 769
        assert_eq!(dev.flash().erases, vec![0, SECTOR_SIZE, 0, SECTOR_SIZE]);

        let mut dev = remount(dev);
        assert_eq!(stored_cursor(&mut dev), 1001);
        dev.write(CURSOR_BLOCK, &1002u32.to_le_bytes()).unwrap();
        assert_eq!(remount(dev).flash().erases.len(), 4);
    }

    #[test]
    fn torn_record_keeps_previous_cursor() {
        let mut dev = NorBlocks::new(RamNor::new(64 * 1024));
        for v in [2u32, 3, 4] {
            dev.write(CURSOR_BLOCK, &v.to_le_bytes()).unwrap();
        }
        dev.flash().tear_at = Some(3 * RECORD_LEN as u32);
        assert_eq!(
            dev.write(CURSOR_BLOCK, &5u32.to_le_bytes()),
            Err(StorageError::Device)
        );

        let mut dev = remount(dev);
        assert_eq!(stored_cursor(&mut dev), 4);
        // the torn slot is skipped, not reprogrammed
        dev.write(CURSOR_BLOCK, &5u32.to_le_bytes()).unwrap();
        let mut dev = remount(dev);
        assert_eq!(stored_cursor(&mut dev), 5);
    }

    #[test]
    fn reset_during_rotation_keeps_cursor() {
        let mut dev = NorBlocks::new(RamNor::new(64 * 1024));
        for v in 2..(2 + RECORDS_PER_SECTOR) {
            dev.write(CURSOR_BLOCK, &v.to_le_bytes()).unwrap();
        }
        let last = 1 + RECORDS_PER_SECTOR;

        // sector 1 is erased, then the first record in it is torn
        dev.flash().tear_at = Some(SECTOR_SIZE);
        assert!(dev.write(CURSOR_BLOCK, &(last + 1).to_le_bytes()).is_err());

        let mut dev = remount(dev);
        assert_eq!(stored_cursor(&mut dev), last);
        dev.write(CURSOR_BLOCK, &(last + 1).to_le_bytes()).unwrap();
        let mut dev = remount(dev);
        assert_eq!(stored_cursor(&mut dev), last + 1);
    }

    #[test]
    fn rewriting_a_programmed_block_keeps_neighbours() {
        let mut dev = NorBlocks::new(RamNor::new(64 * 1024));
        dev.write(1, b"$$one").unwrap();
        dev.write(2, b"$$two").unwrap();
        dev.write(2, b"$$TWO!").unwrap();

        let mut buf = [0u8; 6];
        dev.read(1, &mut buf).unwrap();
        assert_eq!(&buf[..5], b"$$one");
        assert_eq!(buf[5], ERASED);
        dev.read(2, &mut buf).unwrap();
        assert_eq!(&buf, b"$$TWO!");
    }

    #[test]
    fn log_retries_block_after_reset_before_cursor() {
        let mut log = LogWriter::new(NorBlocks::new(RamNor::new(64 * 1024)));
        for f in [b"$$A,0", b"$$A,1", b"$$A,2"] {
            log.append(f).unwrap();
        }
        // data block written, reset before the cursor record
        let mut dev = log.into_inner();
        dev.write(FIRST_PAYLOAD_BLOCK + 3, b"$$partial").unwrap();

        let mut log = LogWriter::new(remount(dev));
        assert_eq!(log.append(b"$$A,3"), Ok(FIRST_PAYLOAD_BLOCK + 3));
        let mut buf = [0xAA; 9];
        log.read_entry(3, &mut buf).unwrap();
        assert_eq!(&buf, b"$$A,3\0\0\0\0");
    }

    #[test]
    fn log_survives_reset_between_erase_and_cursor_program() {
        let blocks = RECORDS_PER_SECTOR + 8;
        let size = (PAYLOAD_BASE + blocks * BLOCK_SIZE as u32) as usize;
        let mut log = LogWriter::new(NorBlocks::new(RamNor::new(size)));
        for i in 0..RECORDS_PER_SECTOR {
            log.append(&[b'$', b'$', (i % 256) as u8 | 1]).unwrap();
        }

        // the next cursor write rotates into sector 1 and is torn there
        log.device().flash().tear_at = Some(SECTOR_SIZE);
        assert_eq!(
            log.append(b"$$lost"),
            Err(LogError::Storage(StorageError::Device))
        );

        let mut log = LogWriter::new(remount(log.into_inner()));
        assert_eq!(log.len(), Ok(RECORDS_PER_SECTOR));
        assert_eq!(log.append(b"$$kept"), Ok(FIRST_PAYLOAD_BLOCK + RECORDS_PER_SECTOR));

        let mut first = [0u8; 3];
        log.read_entry(0, &mut first).unwrap();
        assert_eq!(first, [b'$', b'$', 1]);
        let mut last = [0u8; 6];
        log.read_entry(RECORDS_PER_SECTOR, &mut last).unwrap();
        assert_eq!(&last, b"$$kept");
    }

    #[test]
    fn absent_chip_has_no_blocks() {
        let mut dev = NorBlocks::new(RamNor::new(0));
        assert_eq!(dev.capacity(), 0);
        assert_eq!(
            dev.write(CURSOR_BLOCK, &2u32.to_le_bytes()),
            Err(StorageError::OutOfRange)
        );
    }
}
