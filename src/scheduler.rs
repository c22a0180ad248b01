//! One control cycle: decide, actuate, build, transmit, persist, feed.

use crate::blackbox::{BlockDevice, LogWriter};
use crate::config::{FlightConfig, FRAME_CAPACITY};
use crate::control::{self, Actuation};
use crate::countdown::Countdown;
use crate::error::{EncodeError, LogError, ModemError};
use crate::rtty::RttyModem;
use crate::state::SensorSnapshot;
use crate::telemetry::FrameEncoder;

/// Actuator outputs. Every cycle sets all three, whether or not they changed.
pub trait Actuators {
    fn set_cutdown(&mut self, on: bool);
    fn set_heater(&mut self, on: bool);
    fn set_aux_power(&mut self, on: bool);
}

pub trait Watchdog {
    fn feed(&mut self);
}

/// What happened to this cycle's telemetry sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameOutcome {
    /// Handed to the modem; total length in bytes.
    Sent(usize),
    /// Built but not transmitted.
    Dropped(ModemError),
    /// Not built; nothing transmitted or logged.
    NotBuilt(EncodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleReport {
    pub actuation: Actuation,
    pub frame: FrameOutcome,
    /// Block the frame was logged to. `None` when no frame was built.
    pub logged: Option<Result<u32, LogError>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlightStats {
    pub cycles: u32,
    pub frames_built: u32,
    pub frames_sent: u32,
    pub frames_dropped: u32,
    pub log_failures: u32,
}

impl FlightStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles = self.cycles.wrapping_add(1);
        match report.frame {
            FrameOutcome::Sent(_) => {
                self.frames_built = self.frames_built.wrapping_add(1);
                self.frames_sent = self.frames_sent.wrapping_add(1);
            }
            FrameOutcome::Dropped(_) => {
                self.frames_built = self.frames_built.wrapping_add(1);
                self.frames_dropped = self.frames_dropped.wrapping_add(1);
            }
            FrameOutcome::NotBuilt(_) => {}
        }
        if let Some(Err(_)) = report.logged {
            self.log_failures = self.log_failures.wrapping_add(1);
        }
    }
}

/// Foreground owner of everything the control loop touches.
pub struct FlightComputer<'a, D, A, W> {
    config: FlightConfig,
    modem: &'a RttyModem,
    countdown: &'a Countdown,
    encoder: FrameEncoder,
    log: LogWriter<D>,
    actuators: A,
    watchdog: W,
    stats: FlightStats,
    last: Option<Actuation>,
    frame: [u8; FRAME_CAPACITY],
    frame_len: usize,
}

impl<'a, D, A, W> FlightComputer<'a, D, A, W>
where
    D: BlockDevice,
    A: Actuators,
    W: Watchdog,
{
    pub fn new(
        config: FlightConfig,
        modem: &'a RttyModem,
        countdown: &'a Countdown,
        log: LogWriter<D>,
        actuators: A,
        watchdog: W,
    ) -> Self {
        Self {
            config,
            modem,
            countdown,
            encoder: FrameEncoder::new(),
            log,
            actuators,
            watchdog,
            stats: FlightStats::default(),
            last: None,
            frame: [0; FRAME_CAPACITY],
            frame_len: 0,
        }
    }

    /// Run one cycle on an already sampled snapshot.
    ///
    /// The watchdog is fed last, after storage, on every path.
    pub fn run_cycle(&mut self, snapshot: &SensorSnapshot) -> CycleReport {
        let actuation = control::decide(
            self.countdown.expired(),
            snapshot.altitude_m,
            snapshot.internal_temp_c,
            &self.config.limits,
        );
        self.apply(actuation);

        let (frame, logged) = match self.encoder.encode(
            snapshot,
            self.countdown.remaining_minutes(),
            &mut self.frame,
        ) {
            Ok(len) => {
                self.frame_len = len;
                let frame = match self.modem.submit(&self.frame[..len]) {
                    Ok(()) => FrameOutcome::Sent(len),
                    Err(e) => {
                        log_debug!("frame dropped: {}", e);
                        FrameOutcome::Dropped(e)
                    }
                };
                (frame, Some(self.log.append(&self.frame[..len])))
            }
            Err(e) => {
                self.frame_len = 0;
                log_error!("frame not built: {}", e);
                (FrameOutcome::NotBuilt(e), None)
            }
        };

        let report = CycleReport {
            actuation,
            frame,
            logged,
        };
        self.stats.record(&report);
        let every = self.config.stats_every;
        if every != 0 && self.stats.cycles % every == 0 {
            let s = &self.stats;
            log_info!(
                "stats: cycles={} built={} sent={} dropped={} log_failures={}",
                s.cycles,
                s.frames_built,
                s.frames_sent,
                s.frames_dropped,
                s.log_failures
            );
        }

        self.watchdog.feed();
        report
    }

    fn apply(&mut self, a: Actuation) {
        self.actuators.set_cutdown(a.cutdown);
        self.actuators.set_heater(a.heater);
        self.actuators.set_aux_power(a.aux_power);

        let prev = self.last.unwrap_or_default();
        if self.last.is_none() || prev.cutdown != a.cutdown {
            if a.cutdown {
                log_warn!("cutdown energized");
            } else {
                log_info!("cutdown off");
            }
        }
        if prev.heater != a.heater {
            log_info!("heater: {}", a.heater);
        }
        if prev.aux_power != a.aux_power {
            log_info!("aux power: {}", a.aux_power);
        }
        self.last = Some(a);
    }

    /// The sentence built by the last cycle; empty if none was built.
    pub fn last_frame(&self) -> &[u8] {
        &self.frame[..self.frame_len]
    }

    pub fn stats(&self) -> FlightStats {
        self.stats
    }

    pub fn log(&mut self) -> &mut LogWriter<D> {
        &mut self.log
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackbox::BlockDevice;
    use crate::config::BLOCK_SIZE;
    use crate::error::StorageError;

    /// Device that accepts and forgets everything.
    struct NullDevice;

    impl BlockDevice for NullDevice {
        fn read(&mut self, _block: u32, buf: &mut [u8]) -> Result<(), StorageError> {
            buf.fill(0);
            Ok(())
        }
        fn write(&mut self, _block: u32, data: &[u8]) -> Result<(), StorageError> {
            assert!(data.len() <= BLOCK_SIZE);
            Ok(())
        }
        fn capacity(&mut self) -> u32 {
            1024
        }
    }

    #[derive(Default)]
    struct Pins(Actuation);

    impl Actuators for Pins {
        fn set_cutdown(&mut self, on: bool) {
            self.0.cutdown = on;
        }
        fn set_heater(&mut self, on: bool) {
            self.0.heater = on;
        }
        fn set_aux_power(&mut self, on: bool) {
            self.0.aux_power = on;
        }
    }

    #[derive(Default)]
    struct Dog(u32);

    impl Watchdog for Dog {
        fn feed(&mut self) {
            self.0 += 1;
        }
    }

    #[test]
    fn stats_count_sent_and_dropped() {
        let modem = RttyModem::new();
        let countdown = Countdown::new(100, 50);
        let mut fc = FlightComputer::new(
            FlightConfig::default(),
            &modem,
            &countdown,
            LogWriter::new(NullDevice),
            Pins::default(),
            Dog::default(),
        );

        let snap = SensorSnapshot::default();
        let first = fc.run_cycle(&snap);
        assert!(matches!(first.frame, FrameOutcome::Sent(_)));
        let second = fc.run_cycle(&snap);
        assert_eq!(second.frame, FrameOutcome::Dropped(ModemError::Busy));

        let stats = fc.stats();
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.frames_built, 2);
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.log_failures, 0);
        assert_eq!(fc.watchdog().0, 2);
    }

    #[test]
    fn last_frame_is_the_sentence() {
        let modem = RttyModem::new();
        let countdown = Countdown::new(0, 50);
        let mut fc = FlightComputer::new(
            FlightConfig::default(),
            &modem,
            &countdown,
            LogWriter::new(NullDevice),
            Pins::default(),
            Dog::default(),
        );

        assert!(fc.last_frame().is_empty());
        let report = fc.run_cycle(&SensorSnapshot::default());
        let FrameOutcome::Sent(len) = report.frame else {
            panic!("frame not sent: {:?}", report.frame);
        };
        assert_eq!(fc.last_frame().len(), len);
        assert!(fc.last_frame().starts_with(b"$$BUSEDS1,0,"));
        assert!(crate::telemetry::verify_sentence(fc.last_frame()));
    }

    #[test]
    fn unbuildable_frame_is_neither_sent_nor_logged() {
        let modem = RttyModem::new();
        let countdown = Countdown::new(100, 50);
        let mut fc = FlightComputer::new(
            FlightConfig::default(),
            &modem,
            &countdown,
            LogWriter::new(NullDevice),
            Pins::default(),
            Dog::default(),
        );

        // every field at its widest rendering overflows the frame buffer
        let mut wide = SensorSnapshot::default();
        wide.gps.lat = -1e300;
        wide.gps.lon = -1e300;
        wide.gps.alt = f32::MIN;
        wide.gps.satellites = u8::MAX;
        wide.altitude_m = Some(f32::MIN);
        wide.external_temp_c = Some(f32::MIN);
        wide.internal_temp_c = Some(f32::MIN);
        wide.accel = [i16::MIN; 3];
        wide.cutdown_voltage = f32::MIN;

        let report = fc.run_cycle(&wide);
        assert_eq!(report.frame, FrameOutcome::NotBuilt(EncodeError::FrameTooLarge));
        assert_eq!(report.logged, None);
        assert!(!modem.is_active());
        assert!(fc.last_frame().is_empty());
        assert_eq!(fc.log().len(), Ok(0));
        assert_eq!(fc.watchdog().0, 1);
        // actuators are still driven
        assert!(fc.actuators().0.heater);

        let stats = fc.stats();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.frames_built, 0);
        assert_eq!(stats.log_failures, 0);

        // the sentence id was not consumed
        fc.run_cycle(&SensorSnapshot::default());
        assert!(fc.last_frame().starts_with(b"$$BUSEDS1,0,"));
    }
}
