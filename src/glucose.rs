//! Calibrated glucose samples and trend classification.

use crate::calibration::{CalibrationParameters, calibrate};
use crate::measurement::Measurement;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Lowest and highest values the sensor reports as a real reading, mg/dL.
pub const MIN_VALID_GLUCOSE: f64 = 39.0;
pub const MAX_VALID_GLUCOSE: f64 = 500.0;

const MGDL_PER_MMOL: f64 = 18.0182;

/// Direction of change between two consecutive accepted samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlucoseTrend {
    UpUpUp,
    UpUp,
    Up,
    Flat,
    Down,
    DownDown,
    DownDownDown,
}

impl GlucoseTrend {
    /// Classify a rate of change in mg/dL per minute.
    pub fn from_slope(mgdl_per_minute: f64) -> Self {
        match mgdl_per_minute {
            s if s > 3.0 => GlucoseTrend::UpUpUp,
            s if s > 2.0 => GlucoseTrend::UpUp,
            s if s > 1.0 => GlucoseTrend::Up,
            s if s < -3.0 => GlucoseTrend::DownDownDown,
            s if s < -2.0 => GlucoseTrend::DownDown,
            s if s < -1.0 => GlucoseTrend::Down,
            _ => GlucoseTrend::Flat,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            GlucoseTrend::UpUpUp => "⇈",
            GlucoseTrend::UpUp => "↑",
            GlucoseTrend::Up => "↗",
            GlucoseTrend::Flat => "→",
            GlucoseTrend::Down => "↘",
            GlucoseTrend::DownDown => "↓",
            GlucoseTrend::DownDownDown => "⇊",
        }
    }
}

impl fmt::Display for GlucoseTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GlucoseTrend::UpUpUp => "upUpUp",
            GlucoseTrend::UpUp => "upUp",
            GlucoseTrend::Up => "up",
            GlucoseTrend::Flat => "flat",
            GlucoseTrend::Down => "down",
            GlucoseTrend::DownDown => "downDown",
            GlucoseTrend::DownDownDown => "downDownDown",
        };
        f.write_str(name)
    }
}

/// Unit glucose values are displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum GlucoseUnit {
    #[default]
    Mgdl,
    Mmol,
}

impl GlucoseUnit {
    pub fn to_mmol(mgdl: f64) -> f64 {
        mgdl / MGDL_PER_MMOL
    }

    pub fn format(self, mgdl: f64) -> String {
        match self {
            GlucoseUnit::Mgdl => format!("{mgdl:.0} mg/dL"),
            GlucoseUnit::Mmol => format!("{:.1} mmol/L", Self::to_mmol(mgdl)),
        }
    }
}

/// A calibrated reading ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseSample {
    pub start_date: SystemTime,
    /// mg/dL
    pub glucose: f64,
    pub trend: Option<GlucoseTrend>,
    pub is_state_valid: bool,
    pub sync_identifier: String,
}

impl GlucoseSample {
    /// Calibrate `measurement` for the sensor with serial `serial`.
    pub fn from_measurement(
        measurement: &Measurement,
        params: &CalibrationParameters,
        serial: &str,
    ) -> Self {
        let glucose = calibrate(measurement, params).round();
        let in_range = (MIN_VALID_GLUCOSE..=MAX_VALID_GLUCOSE).contains(&glucose);
        GlucoseSample {
            start_date: measurement.date,
            glucose,
            trend: None,
            is_state_valid: measurement.is_valid() && in_range,
            sync_identifier: sync_identifier(serial, measurement.date),
        }
    }

    /// Time between an earlier sample and this one; zero if `older` is newer.
    pub fn time_since(&self, older: &GlucoseSample) -> Duration {
        self.start_date
            .duration_since(older.start_date)
            .unwrap_or(Duration::ZERO)
    }

    /// Trend relative to the previously accepted sample, `None` when the
    /// previous sample is older than `stale_after` or not older at all.
    pub fn trend_from(&self, previous: &GlucoseSample, stale_after: Duration) -> Option<GlucoseTrend> {
        let elapsed = self.time_since(previous);
        if elapsed.is_zero() || elapsed > stale_after {
            return None;
        }
        let minutes = elapsed.as_secs_f64() / 60.0;
        Some(GlucoseTrend::from_slope((self.glucose - previous.glucose) / minutes))
    }
}

impl fmt::Display for GlucoseSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mg/dL @ {}", self.glucose, unix_seconds(self.start_date))?;
        if let Some(trend) = self.trend {
            write!(f, " {}", trend.symbol())?;
        }
        if !self.is_state_valid {
            write!(f, " (invalid)")?;
        }
        Ok(())
    }
}

pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Whole minutes since the epoch; samples in the same minute are duplicates.
pub fn sync_minute(date: SystemTime) -> u64 {
    unix_seconds(date) / 60
}

/// Stable de-duplication key: sensor serial plus the sample's minute.
pub fn sync_identifier(serial: &str, date: SystemTime) -> String {
    format!("{serial}-{}", sync_minute(date) * 60)
}

/// Calibrate trend measurements (most recent first). Unless `all` is set
/// only the newest one is converted.
pub fn from_trend_measurements(
    measurements: &[Measurement],
    params: &CalibrationParameters,
    serial: &str,
    all: bool,
) -> Vec<GlucoseSample> {
    let take = if all { measurements.len() } else { 1 };
    measurements
        .iter()
        .take(take)
        .map(|m| GlucoseSample::from_measurement(m, params, serial))
        .collect()
}

pub fn from_history_measurements(
    measurements: &[Measurement],
    params: &CalibrationParameters,
    serial: &str,
) -> Vec<GlucoseSample> {
    measurements
        .iter()
        .map(|m| GlucoseSample::from_measurement(m, params, serial))
        .collect()
}
