//! UKHAS telemetry sentence encoder.
//!
//! ```text
//! $$CALLSIGN,seq,HH:MM:SS,lat,lon,gpsalt,sats,baroalt,exttemp,inttemp,ax,ay,az,cutdown_min,voltage*CRC4\n
//! ```
//!
//! The checksum is CRC-16/CCITT (poly 0x1021, init 0xFFFF) over everything
//! between the `$$` preamble and the `*`.

use core::fmt::{self, Write};

use crate::config::CALLSIGN;
use crate::error::EncodeError;
use crate::state::SensorSnapshot;

/// `*` + 4 hex digits + `\n`
pub const CHECKSUM_SUFFIX_LEN: usize = 6;
const PREAMBLE_LEN: usize = 2;

// ─── CRC ─────────────────────────────────────────────────────────────────────

pub fn crc16_update(mut crc: u16, byte: u8) -> u16 {
    crc ^= (byte as u16) << 8;
    for _ in 0..8 {
        if crc & 0x8000 != 0 {
            crc = (crc << 1) ^ 0x1021;
        } else {
            crc <<= 1;
        }
    }
    crc
}

pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |crc, &b| crc16_update(crc, b))
}

/// Check a complete `$$...*HHHH\n` sentence against its own checksum.
pub fn verify_sentence(sentence: &[u8]) -> bool {
    let Some(star) = sentence.iter().rposition(|&b| b == b'*') else {
        return false;
    };
    if star < PREAMBLE_LEN || !sentence.starts_with(b"$$") {
        return false;
    }
    let tail = &sentence[star + 1..];
    if tail.len() != 5 || tail[4] != b'\n' {
        return false;
    }
    let Ok(hex) = core::str::from_utf8(&tail[..4]) else {
        return false;
    };
    if hex.bytes().any(|b| b.is_ascii_lowercase()) {
        return false;
    }
    match u16::from_str_radix(hex, 16) {
        Ok(expected) => crc16(&sentence[PREAMBLE_LEN..star]) == expected,
        Err(_) => false,
    }
}

// ─── Fixed-point rendering ───────────────────────────────────────────────────

/// `fmt::Write` over a caller-owned byte slice; overflow is an error, never a
/// truncation.
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let end = self.pos.checked_add(bytes.len()).ok_or(fmt::Error)?;
        if end > self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

/// Render `value` with exactly `decimals` places, rounding half away from
/// zero. A value that rounds to zero is printed unsigned, so `-0.0` never
/// appears. Non-finite values render as nothing.
pub fn write_fixed<W: Write>(w: &mut W, value: f64, decimals: u32) -> fmt::Result {
    if !value.is_finite() {
        return Ok(());
    }
    let unit = 10u64.pow(decimals);
    let scaled = value * unit as f64;
    let rounded = if scaled < 0.0 {
        (scaled - 0.5) as i64
    } else {
        (scaled + 0.5) as i64
    };

    let sign = if rounded < 0 { "-" } else { "" };
    let magnitude = rounded.unsigned_abs();
    let whole = magnitude / unit;
    let frac = magnitude % unit;
    if decimals == 0 {
        write!(w, "{}{}", sign, whole)
    } else {
        write!(w, "{}{}.{:0width$}", sign, whole, frac, width = decimals as usize)
    }
}

pub fn write_fixed1<W: Write>(w: &mut W, value: f32) -> fmt::Result {
    write_fixed(w, value as f64, 1)
}

pub fn write_fixed6<W: Write>(w: &mut W, value: f64) -> fmt::Result {
    write_fixed(w, value, 6)
}

/// Unknown values leave the field empty.
fn write_opt1<W: Write>(w: &mut W, value: Option<f32>) -> fmt::Result {
    match value {
        Some(v) => write_fixed1(w, v),
        None => Ok(()),
    }
}

// ─── Encoder ─────────────────────────────────────────────────────────────────

/// Builds one sentence per control cycle and owns the sentence counter.
pub struct FrameEncoder {
    next_id: u32,
}

impl FrameEncoder {
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Id the next successfully built sentence will carry.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Encode one sentence into `buf` and return its length including the
    /// trailing newline.
    ///
    /// On [`EncodeError::FrameTooLarge`] the contents of `buf` carry no
    /// checksum and must not be sent or stored; the sentence id is not
    /// consumed.
    pub fn encode(
        &mut self,
        snapshot: &SensorSnapshot,
        cutdown_minutes: u32,
        buf: &mut [u8],
    ) -> Result<usize, EncodeError> {
        let id = self.next_id;
        let body_len = write_body(id, snapshot, cutdown_minutes, buf)
            .map_err(|_| EncodeError::FrameTooLarge)?;

        let total = body_len + CHECKSUM_SUFFIX_LEN;
        if total > buf.len() {
            return Err(EncodeError::FrameTooLarge);
        }

        let crc = crc16(&buf[PREAMBLE_LEN..body_len]);
        let mut w = SliceWriter::new(&mut buf[body_len..total]);
        write!(w, "*{:04X}\n", crc).map_err(|_| EncodeError::FrameTooLarge)?;

        self.next_id = id.wrapping_add(1);
        Ok(total)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Every field is followed by a comma; the final one is dropped. Returns the
/// body length without that comma.
fn write_body(
    id: u32,
    s: &SensorSnapshot,
    cutdown_minutes: u32,
    buf: &mut [u8],
) -> Result<usize, fmt::Error> {
    let mut w = SliceWriter::new(buf);
    let gps = &s.gps;

    write!(w, "$${},{},", CALLSIGN, id)?;
    write!(
        w,
        "{:02}:{:02}:{:02},",
        gps.time.hours, gps.time.minutes, gps.time.seconds
    )?;

    write_fixed6(&mut w, gps.lat)?;
    w.write_char(',')?;
    write_fixed6(&mut w, gps.lon)?;
    w.write_char(',')?;
    write_fixed1(&mut w, gps.alt)?;
    w.write_char(',')?;
    write!(w, "{},", gps.satellites)?;

    write_opt1(&mut w, s.altitude_m)?;
    w.write_char(',')?;
    write_opt1(&mut w, s.external_temp_c)?;
    w.write_char(',')?;
    write_opt1(&mut w, s.internal_temp_c)?;
    w.write_char(',')?;

    for axis in s.accel {
        write!(w, "{},", axis)?;
    }
    write!(w, "{},", cutdown_minutes)?;
    write_fixed1(&mut w, s.cutdown_voltage)?;
    w.write_char(',')?;

    Ok(w.len() - 1)
}
