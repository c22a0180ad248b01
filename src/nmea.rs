//! NMEA 0183 ingest: byte-level frame capture, checksum validation and GGA
//! decoding.
//!
//! Bytes arrive from the GPS UART in bursts. The capture state machine only
//! dispatches a line once both checksum digits have been seen, then ignores
//! everything until the next `$`, so a partial line is never decoded twice.

use core::str::FromStr;

use crate::config::NMEA_CAPTURE_LEN;
use crate::error::NmeaError;
use crate::state::{GpsFix, GpsTime};
use crate::sync::SnapshotCell;

const START: u8 = b'$';
const CHECKSUM_MARK: u8 = b'*';
const CHECKSUM_DIGITS: u8 = 2;

/// Most fields read from a GGA line (id through altitude unit).
const GGA_FIELDS: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    AwaitStart,
    Capturing,
    /// Checksum digits received so far.
    InChecksum(u8),
}

/// Diagnostics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IngestStats {
    pub accepted: u16,
    pub checksum_errors: u16,
    pub malformed: u16,
    /// Lines longer than the capture buffer.
    pub overflows: u16,
    /// Valid sentences of a type we do not decode.
    pub ignored: u16,
}

pub struct NmeaIngest {
    line: heapless::Vec<u8, NMEA_CAPTURE_LEN>,
    checksum: [u8; CHECKSUM_DIGITS as usize],
    state: Capture,
    pub stats: IngestStats,
}

impl NmeaIngest {
    pub const fn new() -> Self {
        Self {
            line: heapless::Vec::new(),
            checksum: [0; CHECKSUM_DIGITS as usize],
            state: Capture::AwaitStart,
            stats: IngestStats {
                accepted: 0,
                checksum_errors: 0,
                malformed: 0,
                overflows: 0,
                ignored: 0,
            },
        }
    }

    /// Feed one byte. Returns the outcome when this byte completed a line.
    pub fn push_byte(&mut self, b: u8) -> Option<Result<GpsFix, NmeaError>> {
        if b == START {
            self.line.clear();
            self.state = Capture::Capturing;
            return None;
        }

        match self.state {
            Capture::AwaitStart => None,
            Capture::Capturing => {
                if b == CHECKSUM_MARK {
                    self.state = Capture::InChecksum(0);
                } else {
                    if self.line.is_full() {
                        // overrun: wrap and let the checksum reject the line
                        self.line.clear();
                        self.stats.overflows = self.stats.overflows.wrapping_add(1);
                    }
                    let _ = self.line.push(b);
                }
                None
            }
            Capture::InChecksum(n) => {
                self.checksum[n as usize] = b;
                if n + 1 < CHECKSUM_DIGITS {
                    self.state = Capture::InChecksum(n + 1);
                    return None;
                }
                self.state = Capture::AwaitStart;
                let result = self.dispatch();
                self.record(&result);
                Some(result)
            }
        }
    }

    /// Feed a burst of bytes, publishing every accepted fix into `sink`.
    /// Rejected lines leave `sink` untouched. Returns the number of fixes
    /// published.
    pub fn push_bytes(&mut self, data: &[u8], sink: &SnapshotCell<GpsFix>) -> usize {
        let mut published = 0;
        for &b in data {
            match self.push_byte(b) {
                Some(Ok(fix)) => {
                    sink.publish(fix);
                    published += 1;
                }
                Some(Err(NmeaError::Unsupported)) | None => {}
                Some(Err(e)) => {
                    log_debug!("gps line rejected: {}", e);
                }
            }
        }
        published
    }

    fn record(&mut self, result: &Result<GpsFix, NmeaError>) {
        let counter = match result {
            Ok(_) => &mut self.stats.accepted,
            Err(NmeaError::ChecksumMismatch) => &mut self.stats.checksum_errors,
            Err(NmeaError::Malformed) => &mut self.stats.malformed,
            Err(NmeaError::Unsupported) => &mut self.stats.ignored,
        };
        *counter = counter.wrapping_add(1);
    }

    fn dispatch(&self) -> Result<GpsFix, NmeaError> {
        let content = self.line.as_slice();
        let expected = parse_hex_byte(self.checksum).ok_or(NmeaError::ChecksumMismatch)?;
        if xor_checksum(content) != expected {
            return Err(NmeaError::ChecksumMismatch);
        }

        // NMEA 0183 is 7-bit ASCII; anything else is line noise that happened
        // to pass the XOR check
        if !content.is_ascii() {
            return Err(NmeaError::Malformed);
        }
        let line = core::str::from_utf8(content).map_err(|_| NmeaError::Malformed)?;
        let id = line.split(',').next().unwrap_or("");
        if id.len() == 5 && id.ends_with("GGA") {
            parse_gga(line)
        } else {
            Err(NmeaError::Unsupported)
        }
    }
}

impl Default for NmeaIngest {
    fn default() -> Self {
        Self::new()
    }
}

/// XOR of every byte between `$` and `*`.
pub fn xor_checksum(content: &[u8]) -> u8 {
    content.iter().fold(0, |acc, &b| acc ^ b)
}

fn parse_hex_byte(digits: [u8; 2]) -> Option<u8> {
    let hi = (digits[0] as char).to_digit(16)?;
    let lo = (digits[1] as char).to_digit(16)?;
    Some((hi << 4 | lo) as u8)
}

// ────── GGA ──────
// xxGGA,time,lat,NS,lon,EW,quality,sats,hdop,alt,M,geoid,M,age,station

fn parse_gga(line: &str) -> Result<GpsFix, NmeaError> {
    let mut fields = [""; GGA_FIELDS];
    let mut parts = line.split(',');
    for slot in fields.iter_mut() {
        *slot = parts.next().ok_or(NmeaError::Malformed)?;
    }
    let [_id, time, lat, ns, lon, ew, quality, sats, _hdop, alt, _unit] = fields;

    let quality = parse_u8(quality)?;
    let satellites = if sats.is_empty() { 0 } else { parse_u8(sats)? };
    let time = if time.is_empty() {
        GpsTime::default()
    } else {
        parse_time(time)?
    };

    if quality == 0 {
        return Ok(GpsFix {
            time,
            satellites,
            ..GpsFix::default()
        });
    }

    Ok(GpsFix {
        time,
        lat: parse_coord(lat, ns, b'N', b'S', 90.0)?,
        lon: parse_coord(lon, ew, b'E', b'W', 180.0)?,
        alt: parse_decimal(alt, true)? as f32,
        satellites,
        fix_valid: true,
    })
}

/// Unsigned integer field: ASCII digits only, no sign.
fn parse_u8(s: &str) -> Result<u8, NmeaError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NmeaError::Malformed);
    }
    u8::from_str(s).map_err(|_| NmeaError::Malformed)
}

/// Plain decimal field: digits with at most one `.`, and a leading `-` only
/// when `signed`. Exponents, `NaN` and `inf` never reach the float parser.
fn parse_decimal(s: &str, signed: bool) -> Result<f64, NmeaError> {
    let digits = match s.strip_prefix('-') {
        Some(rest) if signed => rest,
        _ => s,
    };
    let well_formed = !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && digits.bytes().filter(|&b| b == b'.').count() <= 1;
    if !well_formed {
        return Err(NmeaError::Malformed);
    }
    f64::from_str(s).map_err(|_| NmeaError::Malformed)
}

/// `hhmmss` with optional fractional seconds.
fn parse_time(s: &str) -> Result<GpsTime, NmeaError> {
    let digits = s.as_bytes().get(..6).ok_or(NmeaError::Malformed)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(NmeaError::Malformed);
    }
    let pair = |i: usize| (digits[i] - b'0') * 10 + (digits[i + 1] - b'0');
    let time = GpsTime {
        hours: pair(0),
        minutes: pair(2),
        seconds: pair(4),
    };
    if time.hours > 23 || time.minutes > 59 || time.seconds > 60 {
        return Err(NmeaError::Malformed);
    }
    Ok(time)
}

/// `(d)ddmm.mmmm` plus hemisphere into signed decimal degrees, at most
/// `max_degrees` either side of zero.
fn parse_coord(
    value: &str,
    hemisphere: &str,
    positive: u8,
    negative: u8,
    max_degrees: f64,
) -> Result<f64, NmeaError> {
    let raw = parse_decimal(value, false)?;
    let degrees = (raw / 100.0) as u32 as f64;
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    if minutes >= 60.0 || decimal > max_degrees {
        return Err(NmeaError::Malformed);
    }

    match hemisphere.as_bytes() {
        [h] if *h == positive => Ok(decimal),
        [h] if *h == negative => Ok(-decimal),
        _ => Err(NmeaError::Malformed),
    }
}
