//! Bit-banged RTTY transmitter (8 data bits, no parity, 2 stop bits).
//!
//! The modem owns one transmit slot. The foreground loop fills it with
//! [`RttyModem::submit`]; the periodic tick interrupt drains it one bit per
//! call with [`RttyModem::tick`] and drives the returned [`Line`] onto the
//! radio's data pin.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::RTTY_MAX_LEN;
use crate::error::ModemError;

const DATA_BITS: u8 = 8;
/// start + 8 data + 2 stop
pub const BITS_PER_CHAR: u8 = 11;

/// Level to hold on the radio data line until the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Line {
    /// Nothing to send; hold the mark level.
    Idle,
    Low,
    High,
}

impl Line {
    /// Electrical level for the GPIO. Idle rests at mark.
    pub fn is_high(self) -> bool {
        !matches!(self, Line::Low)
    }
}

/// The single transmit slot and its bit position.
///
/// `phase` walks 0 (start bit), 1..=8 (data, LSB first), 9..=10 (stop bits).
pub struct Transmission {
    buf: [u8; RTTY_MAX_LEN],
    len: usize,
    index: usize,
    phase: u8,
}

impl Transmission {
    pub const fn new() -> Self {
        Self {
            buf: [0; RTTY_MAX_LEN],
            len: 0,
            index: 0,
            phase: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.len > 0
    }

    pub fn load(&mut self, data: &[u8]) -> Result<(), ModemError> {
        if data.len() > RTTY_MAX_LEN {
            return Err(ModemError::TooLong);
        }
        if self.is_active() {
            return Err(ModemError::Busy);
        }

        self.buf[..data.len()].copy_from_slice(data);
        self.index = 0;
        self.phase = 0;
        self.len = data.len();
        Ok(())
    }

    /// Emit the current bit and advance.
    pub fn step(&mut self) -> Line {
        if !self.is_active() {
            return Line::Idle;
        }

        let line = match self.phase {
            0 => Line::Low,
            p if p <= DATA_BITS => {
                if (self.buf[self.index] >> (p - 1)) & 1 == 1 {
                    Line::High
                } else {
                    Line::Low
                }
            }
            _ => Line::High,
        };

        self.phase += 1;
        if self.phase >= BITS_PER_CHAR {
            self.phase = 0;
            self.index += 1;
            if self.index >= self.len {
                self.len = 0;
            }
        }

        line
    }

    /// Characters still to be sent, counting the one on air.
    pub fn remaining(&self) -> usize {
        if self.is_active() {
            self.len - self.index
        } else {
            0
        }
    }
}

impl Default for Transmission {
    fn default() -> Self {
        Self::new()
    }
}

/// Transmit slot shared between the foreground loop and the tick interrupt.
///
/// Both sides take a short critical section: `submit` for the check-and-copy,
/// `tick` for one bit step. `submit` must not be called from interrupt
/// context.
pub struct RttyModem {
    slot: Mutex<CriticalSectionRawMutex, RefCell<Transmission>>,
}

impl RttyModem {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(RefCell::new(Transmission::new())),
        }
    }

    /// Queue `data` for transmission. Never blocks: a busy modem rejects the
    /// new string and keeps sending the old one untouched.
    pub fn submit(&self, data: &[u8]) -> Result<(), ModemError> {
        self.slot.lock(|slot| slot.borrow_mut().load(data))
    }

    pub fn tick(&self) -> Line {
        self.slot.lock(|slot| slot.borrow_mut().step())
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock(|slot| slot.borrow().is_active())
    }

    pub fn remaining(&self) -> usize {
        self.slot.lock(|slot| slot.borrow().remaining())
    }
}

impl Default for RttyModem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::vec::Vec;

    use super::*;

    fn drain(modem: &RttyModem) -> Vec<Line> {
        let mut out = Vec::new();
        while modem.is_active() {
            out.push(modem.tick());
        }
        out
    }

    #[test]
    fn one_character_takes_eleven_ticks() {
        let modem = RttyModem::new();
        modem.submit(b"A").unwrap();

        let bits: Vec<Line> = (0..11).map(|_| modem.tick()).collect();

        // 'A' = 0x41 = 0b0100_0001, LSB first
        let expected = [
            Line::Low,
            Line::High,
            Line::Low,
            Line::Low,
            Line::Low,
            Line::Low,
            Line::Low,
            Line::High,
            Line::Low,
            Line::High,
            Line::High,
        ];
        assert_eq!(bits, expected);
        assert!(!modem.is_active());
        assert_eq!(modem.tick(), Line::Idle);
    }

    #[test]
    fn data_bits_are_lsb_first_for_every_byte() {
        for byte in [0x00u8, 0xFF, 0x55, 0xAA, b'$', b'\n'] {
            let mut tx = Transmission::new();
            tx.load(&[byte]).unwrap();
            assert_eq!(tx.step(), Line::Low);
            for bit in 0..8 {
                let expected = if (byte >> bit) & 1 == 1 { Line::High } else { Line::Low };
                assert_eq!(tx.step(), expected, "byte {:#04x} bit {}", byte, bit);
            }
            assert_eq!(tx.step(), Line::High);
            assert_eq!(tx.step(), Line::High);
            assert!(!tx.is_active());
        }
    }

    #[test]
    fn second_submit_while_active_is_busy() {
        let modem = RttyModem::new();
        modem.submit(b"$$FIRST").unwrap();
        assert_eq!(modem.submit(b"$$SECOND"), Err(ModemError::Busy));

        let expected = RttyModem::new();
        expected.submit(b"$$FIRST").unwrap();
        assert_eq!(drain(&modem), drain(&expected));
    }

    #[test]
    fn too_long_is_rejected() {
        let modem = RttyModem::new();
        let big = [b'x'; RTTY_MAX_LEN + 1];
        assert_eq!(modem.submit(&big), Err(ModemError::TooLong));
        assert!(!modem.is_active());
        assert!(modem.submit(&big[..RTTY_MAX_LEN]).is_ok());
    }

    #[test]
    fn idle_line_holds_mark() {
        let modem = RttyModem::new();
        assert_eq!(modem.tick(), Line::Idle);
        assert!(Line::Idle.is_high());
        assert!(!Line::Low.is_high());
    }

    #[test]
    fn accepts_new_string_after_completion() {
        let modem = RttyModem::new();
        modem.submit(b"AB").unwrap();
        assert_eq!(modem.remaining(), 2);
        let bits = drain(&modem);
        assert_eq!(bits.len(), 2 * BITS_PER_CHAR as usize);
        assert!(modem.submit(b"C").is_ok());
    }

    #[test]
    fn empty_submit_stays_idle() {
        let modem = RttyModem::new();
        assert!(modem.submit(b"").is_ok());
        assert!(!modem.is_active());
    }
}
