//! `libre-transmitter` library.
//!
//! Turns the raw 344-byte memory blocks that Bluetooth transmitters relay
//! from Libre sensors into calibrated, de-duplicated glucose samples.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit
//! codes. The reading pipeline lives in [`crate::reader`]; [`crate::app`]
//! wires it to a transport and output streams so it can be tested
//! deterministically.

pub mod app;
pub mod calibration;
pub mod delivery;
pub mod display;
pub mod glucose;
pub mod measurement;
pub mod notify;
pub mod output;
pub mod queue;
pub mod reader;
pub mod sensor;
pub mod throttle;
pub mod transport;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use calibration::store::{CalibrationStore, FileCalibrationStore, MemoryCalibrationStore};
pub use calibration::{CalibrationParameters, Calibrator};
pub use delivery::{DeliveryQueue, ReaderEvent, ReadingSink};
pub use glucose::{GlucoseSample, GlucoseTrend, GlucoseUnit};
pub use measurement::Measurement;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use reader::{Reader, ReaderConfig, ReadingError, ReadingResult};
pub use sensor::{SensorBlock, SensorDataError, SensorState};
pub use throttle::{Throttle, parse_duration};
pub use transport::{Transport, TransportError, TransportEvent};
