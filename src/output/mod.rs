//! Output formatters for delivered glucose samples.

pub mod influxdb;

use crate::glucose::GlucoseSample;

/// Converts one delivered sample into a line of output.
pub trait OutputFormatter: Send + Sync {
    /// Format `sample` taken by the sensor with serial number `serial`.
    fn format(&self, sample: &GlucoseSample, serial: &str) -> String;
}
