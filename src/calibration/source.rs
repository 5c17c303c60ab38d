//! Sources of calibration parameters used on a store miss.

use super::CalibrationParameters;
use crate::sensor::SensorBlock;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;

/// Errors reported by a calibration source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid calibration data: {0}")]
    Invalid(String),
    #[error("No calibration available for fingerprint {0}")]
    NotFound(u16),
}

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CalibrationParameters, SourceError>> + Send + 'a>>;

/// Remote exchange that derives calibration parameters for a sensor block.
///
/// Invoked only when the store has no parameters for the block's
/// fingerprint.
pub trait CalibrationSource: Send + Sync {
    fn fetch(&self, block: &SensorBlock) -> FetchFuture<'_>;
}

/// Source for hosts without a calibration service; every fetch fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSource;

impl CalibrationSource for UnavailableSource {
    fn fetch(&self, block: &SensorBlock) -> FetchFuture<'_> {
        let fingerprint = block.fingerprint();
        Box::pin(async move { Err(SourceError::NotFound(fingerprint)) })
    }
}

/// Reads exported parameters from a JSON file (one object or a list).
///
/// The file is read on every fetch so parameters exported while the reader
/// is running are picked up on the next cycle.
#[derive(Debug, Clone)]
pub struct FileCalibrationSource {
    path: PathBuf,
}

impl FileCalibrationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<CalibrationParameters>, SourceError> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| SourceError::Network(format!("{}: {e}", self.path.display())))?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| SourceError::Invalid(e.to_string()))?;
        let parsed = if value.is_array() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|p| vec![p])
        };
        parsed.map_err(|e| SourceError::Invalid(e.to_string()))
    }
}

impl CalibrationSource for FileCalibrationSource {
    fn fetch(&self, block: &SensorBlock) -> FetchFuture<'_> {
        let fingerprint = block.fingerprint();
        Box::pin(async move {
            self.load()?
                .into_iter()
                .find(|p| p.fingerprint == fingerprint)
                .ok_or(SourceError::NotFound(fingerprint))
        })
    }
}
