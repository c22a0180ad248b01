//! Flight-control and telemetry core for a high-altitude balloon payload.
//!
//! Everything in this crate is hardware independent: the firmware binary
//! (`src/main.rs`, behind the `firmware` feature) wires these services to the
//! STM32 peripherals, and the host test suite drives them with mocks.
#![no_std]

#[macro_use]
pub mod logging;

pub mod blackbox;
pub mod config;
pub mod control;
pub mod countdown;
pub mod error;
pub mod nmea;
pub mod nor;
pub mod rtty;
pub mod scheduler;
pub mod sensors;
pub mod state;
pub mod sync;
pub mod telemetry;
pub mod voltage;

pub use blackbox::{BlockDevice, LogWriter};
pub use config::FlightConfig;
pub use control::{Actuation, ActuatorLimits};
pub use countdown::Countdown;
pub use error::{EncodeError, LogError, ModemError, NmeaError, StorageError};
pub use nmea::NmeaIngest;
pub use nor::{NorBlocks, NorFlash};
pub use rtty::{Line, RttyModem};
pub use scheduler::{Actuators, CycleReport, FlightComputer, FlightStats, FrameOutcome, Watchdog};
pub use sensors::{SensorSampler, SensorSuite};
pub use state::{BaroReading, GpsFix, GpsTime, SensorSnapshot};
pub use sync::SnapshotCell;
pub use telemetry::FrameEncoder;
pub use voltage::{VoltageSampler, VoltageScale};
