//! Append-only frame log over a block device.
//!
//! Layout: block [`CURSOR_BLOCK`] holds the index of the next free block as a
//! little-endian `u32`; every block from [`FIRST_PAYLOAD_BLOCK`] on holds one
//! zero-padded telemetry sentence. An append writes the data block first and
//! the cursor second, so a reset between the two rewrites the same block on
//! the next boot instead of leaving a gap.
//!
//! Entries are contiguous, so a lost cursor is rebuilt by searching for the
//! first unwritten payload block rather than restarting the log.

use crate::config::{BLOCK_SIZE, CURSOR_BLOCK, FIRST_PAYLOAD_BLOCK};
use crate::error::{LogError, StorageError};

/// Block-addressed storage. Blocks are [`BLOCK_SIZE`] bytes.
///
/// Implementations may block, but must give up after a bounded time and
/// report [`StorageError::Timeout`].
pub trait BlockDevice {
    /// Read the first `buf.len()` bytes of `block`.
    fn read(&mut self, block: u32, buf: &mut [u8]) -> Result<(), StorageError>;
    /// Write `data` (at most one block) to `block`.
    fn write(&mut self, block: u32, data: &[u8]) -> Result<(), StorageError>;
    /// Number of addressable blocks, cursor block included.
    fn capacity(&mut self) -> u32;
}

/// Bytes of the cursor block that carry the cursor.
pub const CURSOR_LEN: usize = 4;

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn read(&mut self, block: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(block, buf)
    }

    fn write(&mut self, block: u32, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(block, data)
    }

    fn capacity(&mut self) -> u32 {
        (**self).capacity()
    }
}

pub struct LogWriter<D> {
    device: D,
    /// Next free block. `None` until loaded from the device.
    cursor: Option<u32>,
    scratch: [u8; BLOCK_SIZE],
}

impl<D: BlockDevice> LogWriter<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            cursor: None,
            scratch: [0; BLOCK_SIZE],
        }
    }

    /// Next free block, loading it from the cursor block on first use.
    ///
    /// A stored cursor outside `1..=capacity` (erased NOR, a zeroed card, a
    /// reset mid-update) is rebuilt from the payload blocks themselves.
    pub fn cursor(&mut self) -> Result<u32, LogError> {
        if let Some(cursor) = self.cursor {
            return Ok(cursor);
        }

        let mut raw = [0u8; CURSOR_LEN];
        self.device.read(CURSOR_BLOCK, &mut raw)?;
        let stored = u32::from_le_bytes(raw);
        let capacity = self.device.capacity();

        let cursor = if stored < FIRST_PAYLOAD_BLOCK || stored > capacity {
            let found = self.find_end(capacity)?;
            log_warn!(
                "log cursor {} outside 1..={}, resuming after last entry at block {}",
                stored,
                capacity,
                found
            );
            found
        } else {
            log_info!("log cursor loaded: block {}", stored);
            stored
        };
        self.cursor = Some(cursor);
        Ok(cursor)
    }

    /// First unwritten payload block, by bisection over the contiguous
    /// entries. `capacity` when every block is in use.
    fn find_end(&mut self, capacity: u32) -> Result<u32, StorageError> {
        let (mut lo, mut hi) = (FIRST_PAYLOAD_BLOCK, capacity);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.is_unwritten(mid)? {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }

    /// A block whose head is all `0xFF` (erased NOR) or all `0x00` (zeroed
    /// media). Sentences always start with `$$`, so no entry looks like this.
    fn is_unwritten(&mut self, block: u32) -> Result<bool, StorageError> {
        let mut head = [0u8; CURSOR_LEN];
        self.device.read(block, &mut head)?;
        Ok(head == [0xFF; CURSOR_LEN] || head == [0x00; CURSOR_LEN])
    }

    /// Number of entries written so far.
    pub fn len(&mut self) -> Result<u32, LogError> {
        Ok(self.cursor()? - FIRST_PAYLOAD_BLOCK)
    }

    pub fn is_empty(&mut self) -> Result<bool, LogError> {
        Ok(self.len()? == 0)
    }

    /// Persist `frame` in the next free block and advance the cursor.
    ///
    /// `frame` is truncated to one block and zero-padded. Returns the block it
    /// landed in. On any failure the in-memory cursor is unchanged.
    pub fn append(&mut self, frame: &[u8]) -> Result<u32, LogError> {
        let cursor = self.cursor()?;
        if cursor >= self.device.capacity() {
            return Err(LogError::Full);
        }

        let n = frame.len().min(BLOCK_SIZE);
        self.scratch.fill(0);
        self.scratch[..n].copy_from_slice(&frame[..n]);
        self.device.write(cursor, &self.scratch).map_err(|e| {
            log_error!("log data write at block {} failed: {}", cursor, e);
            e
        })?;

        let next = cursor + 1;
        self.device.write(CURSOR_BLOCK, &next.to_le_bytes()).map_err(|e| {
            log_error!("log cursor write ({}) failed: {}", next, e);
            e
        })?;

        self.cursor = Some(next);
        Ok(cursor)
    }

    /// Read entry `index` (0 = first frame ever logged) into `buf`.
    pub fn read_entry(&mut self, index: u32, buf: &mut [u8]) -> Result<(), LogError> {
        if index >= self.len()? || buf.len() > BLOCK_SIZE {
            return Err(StorageError::OutOfRange.into());
        }
        self.device.read(FIRST_PAYLOAD_BLOCK + index, buf)?;
        Ok(())
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::vec;
    use std::vec::Vec;

    use super::*;

    /// RAM-backed device with per-block failure injection.
    struct MemoryDevice {
        blocks: Vec<[u8; BLOCK_SIZE]>,
        fail_write: Option<u32>,
        writes: Vec<u32>,
    }

    impl MemoryDevice {
        fn new(capacity: u32) -> Self {
            Self {
                blocks: vec![[0; BLOCK_SIZE]; capacity as usize],
                fail_write: None,
                writes: Vec::new(),
            }
        }

        fn erased(capacity: u32) -> Self {
            Self {
                blocks: vec![[0xFF; BLOCK_SIZE]; capacity as usize],
                ..Self::new(0)
            }
        }

        fn stored_cursor(&self) -> u32 {
            let b = &self.blocks[CURSOR_BLOCK as usize];
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        }
    }

    impl BlockDevice for MemoryDevice {
        fn read(&mut self, block: u32, buf: &mut [u8]) -> Result<(), StorageError> {
            let src = self.blocks.get(block as usize).ok_or(StorageError::OutOfRange)?;
            buf.copy_from_slice(&src[..buf.len()]);
            Ok(())
        }

        fn write(&mut self, block: u32, data: &[u8]) -> Result<(), StorageError> {
            if self.fail_write == Some(block) {
                return Err(StorageError::Device);
            }
            let dst = self.blocks.get_mut(block as usize).ok_or(StorageError::OutOfRange)?;
            dst[..data.len()].copy_from_slice(data);
            self.writes.push(block);
            Ok(())
        }

        fn capacity(&mut self) -> u32 {
            self.blocks.len() as u32
        }
    }

    #[test]
    fn appends_land_in_order_and_read_back() {
        let mut log = LogWriter::new(MemoryDevice::new(16));
        let frames: [&[u8]; 3] = [b"$$A,0*0000\n", b"$$A,1*1111\n", b"$$A,2*2222\n"];
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(log.append(f), Ok(FIRST_PAYLOAD_BLOCK + i as u32));
        }

        assert_eq!(log.cursor(), Ok(FIRST_PAYLOAD_BLOCK + 3));
        assert_eq!(log.len(), Ok(3));
        assert_eq!(log.device().stored_cursor(), FIRST_PAYLOAD_BLOCK + 3);

        for (i, f) in frames.iter().enumerate() {
            let mut block = [0xAA; BLOCK_SIZE];
            log.read_entry(i as u32, &mut block).unwrap();
            assert_eq!(&block[..f.len()], *f);
            assert!(block[f.len()..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn data_written_before_cursor() {
        let mut log = LogWriter::new(MemoryDevice::new(8));
        log.append(b"frame").unwrap();
        assert_eq!(log.device().writes, vec![1, CURSOR_BLOCK]);
    }

    #[test]
    fn data_failure_leaves_cursor() {
        let mut dev = MemoryDevice::new(8);
        dev.fail_write = Some(FIRST_PAYLOAD_BLOCK);
        let mut log = LogWriter::new(dev);

        assert_eq!(log.append(b"lost"), Err(LogError::Storage(StorageError::Device)));
        assert_eq!(log.cursor(), Ok(FIRST_PAYLOAD_BLOCK));
        // pointer block never touched
        assert!(log.device().writes.is_empty());

        log.device().fail_write = None;
        assert_eq!(log.append(b"kept"), Ok(FIRST_PAYLOAD_BLOCK));
    }

    #[test]
    fn pointer_failure_leaves_cursor() {
        let mut dev = MemoryDevice::new(8);
        dev.fail_write = Some(CURSOR_BLOCK);
        let mut log = LogWriter::new(dev);

        assert!(log.append(b"first").is_err());
        assert_eq!(log.cursor(), Ok(FIRST_PAYLOAD_BLOCK));

        // the retry rewrites the same data block
        log.device().fail_write = None;
        assert_eq!(log.append(b"again"), Ok(FIRST_PAYLOAD_BLOCK));
        assert_eq!(log.cursor(), Ok(FIRST_PAYLOAD_BLOCK + 1));
    }

    #[test]
    fn cursor_survives_reboot() {
        let mut log = LogWriter::new(MemoryDevice::new(8));
        log.append(b"one").unwrap();
        log.append(b"two").unwrap();

        let mut rebooted = LogWriter::new(log.into_inner());
        assert_eq!(rebooted.append(b"three"), Ok(FIRST_PAYLOAD_BLOCK + 2));
        assert_eq!(rebooted.len(), Ok(3));
    }

    #[test]
    fn erased_store_starts_fresh() {
        let mut log = LogWriter::new(MemoryDevice::erased(8));
        assert_eq!(log.cursor(), Ok(FIRST_PAYLOAD_BLOCK));
        assert_eq!(log.is_empty(), Ok(true));
    }

    #[test]
    fn full_log_rejects_without_writing() {
        let mut log = LogWriter::new(MemoryDevice::new(3));
        log.append(b"a").unwrap();
        log.append(b"b").unwrap();
        let writes = log.device().writes.len();

        assert_eq!(log.append(b"c"), Err(LogError::Full));
        assert_eq!(log.device().writes.len(), writes);
        assert_eq!(log.cursor(), Ok(3));
    }

    #[test]
    fn oversize_frame_is_truncated() {
        let mut log = LogWriter::new(MemoryDevice::new(4));
        let big = [b'x'; BLOCK_SIZE + 20];
        log.append(&big).unwrap();

        let mut block = [0u8; BLOCK_SIZE];
        log.read_entry(0, &mut block).unwrap();
        assert!(block.iter().all(|&b| b == b'x'));
    }

    #[test]
    fn read_past_end_is_out_of_range() {
        let mut log = LogWriter::new(MemoryDevice::new(4));
        let mut block = [0u8; BLOCK_SIZE];
        assert_eq!(
            log.read_entry(0, &mut block),
            Err(LogError::Storage(StorageError::OutOfRange))
        );
    }

    #[test]
    fn lost_cursor_resumes_after_last_entry() {
        let mut log = LogWriter::new(MemoryDevice::new(16));
        for f in [b"$$A,0", b"$$A,1", b"$$A,2"] {
            log.append(f).unwrap();
        }

        // reset while the cursor block was erased but not yet rewritten
        let mut dev = log.into_inner();
        dev.blocks[CURSOR_BLOCK as usize] = [0xFF; BLOCK_SIZE];

        let mut rebooted = LogWriter::new(dev);
        assert_eq!(rebooted.append(b"$$A,3"), Ok(FIRST_PAYLOAD_BLOCK + 3));
        assert_eq!(rebooted.len(), Ok(4));

        let mut block = [0u8; 5];
        rebooted.read_entry(0, &mut block).unwrap();
        assert_eq!(&block, b"$$A,0");
    }

    #[test]
    fn erased_cursor_on_nor_finds_end_of_log() {
        let mut log = LogWriter::new(MemoryDevice::erased(16));
        for i in 0..5u8 {
            log.append(&[b'$', b'$', b'0' + i]).unwrap();
        }
        let mut dev = log.into_inner();
        dev.blocks[CURSOR_BLOCK as usize] = [0xFF; BLOCK_SIZE];

        let mut rebooted = LogWriter::new(dev);
        assert_eq!(rebooted.cursor(), Ok(FIRST_PAYLOAD_BLOCK + 5));
        // recovery only reads
        assert_eq!(rebooted.device().writes.len(), 10);
    }

    #[test]
    fn lost_cursor_on_full_log_stays_full() {
        let mut log = LogWriter::new(MemoryDevice::new(4));
        for f in [b"$$x", b"$$y", b"$$z"] {
            log.append(f).unwrap();
        }
        let mut dev = log.into_inner();
        dev.blocks[CURSOR_BLOCK as usize] = [0; BLOCK_SIZE];

        let mut rebooted = LogWriter::new(dev);
        assert_eq!(rebooted.cursor(), Ok(4));
        assert_eq!(rebooted.append(b"$$w"), Err(LogError::Full));
    }
}
