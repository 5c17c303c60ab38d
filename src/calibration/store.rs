//! Persistent storage of calibration parameters, keyed by fingerprint.

use super::CalibrationParameters;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors raised by a calibration store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Calibration store I/O error: {0}")]
    Io(String),
    #[error("Calibration store is corrupt: {0}")]
    Corrupt(String),
}

/// Durable, authoritative storage for calibration parameters.
pub trait CalibrationStore: Send + Sync {
    fn get(&self, fingerprint: u16) -> Option<CalibrationParameters>;
    fn set(&self, fingerprint: u16, params: CalibrationParameters) -> Result<(), StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCalibrationStore {
    entries: Mutex<BTreeMap<u16, CalibrationParameters>>,
}

impl CalibrationStore for MemoryCalibrationStore {
    fn get(&self, fingerprint: u16) -> Option<CalibrationParameters> {
        lock(&self.entries).get(&fingerprint).cloned()
    }

    fn set(&self, fingerprint: u16, params: CalibrationParameters) -> Result<(), StoreError> {
        lock(&self.entries).insert(fingerprint, params);
        Ok(())
    }
}

/// Store backed by a JSON file mapping fingerprints to parameters.
///
/// Every `set` rewrites the file before returning.
#[derive(Debug)]
pub struct FileCalibrationStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<u16, CalibrationParameters>>,
}

impl FileCalibrationStore {
    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => {
                serde_json::from_str(&text).map_err(|e| StoreError::Corrupt(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        log::debug!(
            "opened calibration store {} with {} entries",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn get(&self, fingerprint: u16) -> Option<CalibrationParameters> {
        lock(&self.entries).get(&fingerprint).cloned()
    }

    fn set(&self, fingerprint: u16, params: CalibrationParameters) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        let mut updated = entries.clone();
        updated.insert(fingerprint, params);

        let text =
            serde_json::to_string_pretty(&updated).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, text).map_err(|e| {
            log::error!("failed to persist calibration to {}: {e}", self.path.display());
            StoreError::Io(e.to_string())
        })?;

        *entries = updated;
        Ok(())
    }
}
