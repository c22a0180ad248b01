//! Error types shared across the payload services.
//!
//! Every error is small and `Copy`: they are returned from the control loop
//! every cycle and logged, never boxed.

use core::fmt;

/// Rejections from [`RttyModem::submit`](crate::rtty::RttyModem::submit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemError {
    /// A transmission is still on air.
    Busy,
    /// Longer than the transmit slot.
    TooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// Sentence plus checksum suffix does not fit the caller's buffer.
    FrameTooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Device did not finish within its busy timeout.
    Timeout,
    /// Bus or device reported a failure.
    Device,
    /// Block index beyond the device capacity.
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogError {
    Storage(StorageError),
    /// Every payload block has been used.
    Full,
}

impl From<StorageError> for LogError {
    fn from(e: StorageError) -> Self {
        LogError::Storage(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NmeaError {
    ChecksumMismatch,
    /// Checksum matched but a field could not be decoded.
    Malformed,
    /// Valid sentence of a type we do not decode.
    Unsupported,
}

impl fmt::Display for ModemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemError::Busy => f.write_str("modem busy"),
            ModemError::TooLong => f.write_str("string too long for modem"),
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::FrameTooLarge => f.write_str("frame too large"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Timeout => f.write_str("storage timeout"),
            StorageError::Device => f.write_str("storage device error"),
            StorageError::OutOfRange => f.write_str("block out of range"),
        }
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::Storage(e) => write!(f, "log write failed: {}", e),
            LogError::Full => f.write_str("log full"),
        }
    }
}

impl fmt::Display for NmeaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NmeaError::ChecksumMismatch => f.write_str("nmea checksum mismatch"),
            NmeaError::Malformed => f.write_str("malformed nmea sentence"),
            NmeaError::Unsupported => f.write_str("unsupported nmea sentence"),
        }
    }
}
