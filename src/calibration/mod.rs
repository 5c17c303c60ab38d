//! Conversion of raw counts into calibrated glucose values.
//!
//! Calibration parameters are bound to one sensor through the footer
//! checksum fingerprint. The [`Calibrator`] looks them up in the persistent
//! store and, when they are missing or belong to another sensor, fetches
//! them once from the remote source before persisting them.

pub mod source;
pub mod store;

use crate::measurement::Measurement;
use crate::sensor::SensorBlock;
use serde::{Deserialize, Serialize};
use source::{CalibrationSource, SourceError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::{CalibrationStore, StoreError};
use thiserror::Error;

/// Default time allowed for the remote calibration exchange.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while obtaining calibration parameters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Calibration fetch failed: {0}")]
    Fetch(String),
    #[error("Calibration fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("Calibration fetch for fingerprint {0} already in progress")]
    InProgress(u16),
    #[error("Calibration returned for fingerprint {returned}, expected {expected}")]
    FingerprintMismatch { expected: u16, returned: u16 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SourceError> for CalibrationError {
    fn from(err: SourceError) -> Self {
        CalibrationError::Fetch(err.to_string())
    }
}

/// Linear fit coefficients for one sensor.
///
/// `glucose = raw * (slope_slope * t + slope_offset) + (offset_slope * t + offset_offset)`
/// where `t` is the compensated temperature count, followed by the user
/// adjustment `glucose * extra_slope + extra_offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    pub slope_slope: f64,
    pub slope_offset: f64,
    pub offset_slope: f64,
    pub offset_offset: f64,
    #[serde(default = "one")]
    pub extra_slope: f64,
    #[serde(default)]
    pub extra_offset: f64,
    /// Byte-swapped footer checksum of the sensor these parameters belong to
    #[serde(rename = "isValidForFooterWithReverseCRCs")]
    pub fingerprint: u16,
}

fn one() -> f64 {
    1.0
}

impl CalibrationParameters {
    pub fn is_valid_for(&self, block: &SensorBlock) -> bool {
        self.fingerprint == block.fingerprint()
    }
}

/// Calibrated glucose in mg/dL for one measurement.
///
/// Sensors without a temperature channel report a zero raw temperature, in
/// which case only the constant terms apply.
pub fn calibrate(measurement: &Measurement, params: &CalibrationParameters) -> f64 {
    let (slope, offset) = if measurement.raw_temperature == 0 {
        (params.slope_offset, params.offset_offset)
    } else {
        let t = f64::from(measurement.raw_temperature) + f64::from(measurement.temperature_adjustment);
        (
            params.slope_slope * t + params.slope_offset,
            params.offset_slope * t + params.offset_offset,
        )
    };
    let glucose = f64::from(measurement.raw_value) * slope + offset;
    glucose * params.extra_slope + params.extra_offset
}

/// Resolves calibration parameters for a block, consulting the store first.
pub struct Calibrator {
    store: Arc<dyn CalibrationStore>,
    source: Arc<dyn CalibrationSource>,
    timeout: Duration,
    in_flight: Mutex<HashSet<u16>>,
}

impl Calibrator {
    pub fn new(store: Arc<dyn CalibrationStore>, source: Arc<dyn CalibrationSource>) -> Self {
        Calibrator {
            store,
            source,
            timeout: DEFAULT_FETCH_TIMEOUT,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn CalibrationStore> {
        &self.store
    }

    /// Cached parameters for this block, without contacting the source.
    pub fn cached(&self, block: &SensorBlock) -> Option<CalibrationParameters> {
        self.store
            .get(block.fingerprint())
            .filter(|params| params.is_valid_for(block))
    }

    /// Parameters valid for `block`, fetching and persisting them on a miss.
    ///
    /// A failed or mismatching fetch leaves the store untouched, so the next
    /// cycle retries.
    pub async fn parameters_for(
        &self,
        block: &SensorBlock,
    ) -> Result<CalibrationParameters, CalibrationError> {
        if let Some(params) = self.cached(block) {
            log::debug!("calibration for fingerprint {} loaded", block.fingerprint());
            return Ok(params);
        }

        let fingerprint = block.fingerprint();
        log::info!("no calibration for fingerprint {fingerprint}, fetching");

        if !self.begin_fetch(fingerprint) {
            return Err(CalibrationError::InProgress(fingerprint));
        }
        let fetched = tokio::time::timeout(self.timeout, self.source.fetch(block)).await;
        self.end_fetch(fingerprint);

        let params = match fetched {
            Err(_) => return Err(CalibrationError::Timeout(self.timeout)),
            Ok(result) => result?,
        };

        if params.fingerprint != fingerprint {
            log::warn!(
                "discarding calibration for fingerprint {}, block has {fingerprint}",
                params.fingerprint
            );
            return Err(CalibrationError::FingerprintMismatch {
                expected: fingerprint,
                returned: params.fingerprint,
            });
        }

        self.store.set(fingerprint, params.clone())?;
        Ok(params)
    }

    fn begin_fetch(&self, fingerprint: u16) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(fingerprint),
            Err(poisoned) => poisoned.into_inner().insert(fingerprint),
        }
    }

    fn end_fetch(&self, fingerprint: u16) {
        match self.in_flight.lock() {
            Ok(mut set) => set.remove(&fingerprint),
            Err(poisoned) => poisoned.into_inner().remove(&fingerprint),
        };
    }
}
