//! Core application runner for `libre-transmitter`.
//!
//! This module is decoupled from CLI parsing and process exit codes so it can
//! be tested deterministically with an injected transport and output streams.

use crate::calibration::source::{CalibrationSource, FileCalibrationSource, UnavailableSource};
use crate::calibration::store::{
    CalibrationStore, FileCalibrationStore, MemoryCalibrationStore, StoreError,
};
use crate::delivery::{DeliveryQueue, ReaderEvent};
use crate::display::AlarmSchedule;
use crate::glucose::{GlucoseSample, GlucoseUnit};
use crate::output::OutputFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use crate::reader::{Reader, ReaderConfig, ReadingResult};
use crate::sensor::uid::{PatchInfo, SensorUid};
use crate::transport::{TransmitterMetadata, Transport, TransportError};
use clap::Parser;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Replay recorded Libre sensor blocks and print the glucose readings.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Sensor dump: one hex-encoded memory block per line, optionally
    /// prefixed by a unix timestamp.
    pub dump: PathBuf,

    /// Sensor UID as 16 hex digits, required to decrypt Libre 2 blocks
    #[arg(long)]
    pub uid: Option<SensorUid>,

    /// Sensor patch info as 12 hex digits
    #[arg(long)]
    pub patch_info: Option<PatchInfo>,

    /// Transmitter name reported with every block
    #[arg(long, default_value = "Replay")]
    pub transmitter_name: String,

    /// Transmitter battery percentage reported with every block
    #[arg(long, default_value_t = 100)]
    pub battery: u8,

    /// JSON file calibration parameters are persisted to
    #[arg(long)]
    pub calibration_store: Option<PathBuf>,

    /// JSON file with exported calibration parameters, consulted when the
    /// store has none for the sensor
    #[arg(long)]
    pub calibration_source: Option<PathBuf>,

    /// Give up on a calibration fetch after this long.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, default_value = "10s", value_parser = crate::throttle::parse_duration)]
    pub fetch_timeout: Duration,

    /// Print all 16 trend minutes instead of only the newest
    #[arg(long)]
    pub backfill_from_trend: bool,

    /// Also print the 15-minute history records
    #[arg(long)]
    pub backfill_from_history: bool,

    /// Keep validated blocks and include them in the verbose summary
    #[arg(long)]
    pub persist_raw_blocks: bool,

    /// Skip readings at or before this unix timestamp
    #[arg(long, value_name = "UNIX_SECONDS")]
    pub since: Option<u64>,

    /// Glucose unit for notifications and the extra InfluxDB field
    #[arg(long, default_value_t, value_enum)]
    pub unit: GlucoseUnit,

    /// Low glucose alarm threshold in mg/dL
    #[arg(long, requires = "alarm_high")]
    pub alarm_low: Option<f64>,

    /// High glucose alarm threshold in mg/dL
    #[arg(long, requires = "alarm_low")]
    pub alarm_high: Option<f64>,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "glucose")]
    pub influxdb_measurement: String,

    /// Verbose output, print rejected readings and notifications
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn reader_config(&self) -> ReaderConfig {
        let alarm_schedule = match (self.alarm_low, self.alarm_high) {
            (Some(low), Some(high)) => Some(AlarmSchedule { low, high }),
            _ => None,
        };
        ReaderConfig {
            backfill_from_trend: self.backfill_from_trend,
            backfill_from_history: self.backfill_from_history,
            persist_raw_blocks: self.persist_raw_blocks,
            glucose_unit: self.unit,
            calibration_timeout: self.fetch_timeout,
            alarm_schedule,
            ..ReaderConfig::default()
        }
    }

    pub fn metadata(&self) -> TransmitterMetadata {
        TransmitterMetadata {
            name: self.transmitter_name.clone(),
            battery: self.battery,
            firmware: "n/a".to_string(),
            hardware: "n/a".to_string(),
            mac: None,
            uid: self.uid,
            patch_info: self.patch_info,
        }
    }

    fn serial_number(&self) -> String {
        self.uid
            .map_or_else(|| "Unknown".to_string(), |uid| uid.serial_number())
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("reader task failed: {0}")]
    Reader(#[from] tokio::task::JoinError),
}

fn write_sample(
    formatter: &dyn OutputFormatter,
    sample: &GlucoseSample,
    serial: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    let line = formatter.format(sample, serial);
    writeln!(out, "{line}")
}

/// Run the reader over everything the transport relays.
///
/// - Delivered samples are formatted and written to `out`, one line each.
/// - Rejected readings, notifications and a final reader summary go to `err`
///   only when `options.verbose` is true.
pub async fn run_with_io(
    options: Options,
    transport: &dyn Transport,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let store: Arc<dyn CalibrationStore> = match &options.calibration_store {
        Some(path) => Arc::new(FileCalibrationStore::open(path)?),
        None => Arc::new(MemoryCalibrationStore::default()),
    };
    let source: Arc<dyn CalibrationSource> = match &options.calibration_source {
        Some(path) => Arc::new(FileCalibrationSource::new(path)),
        None => Arc::new(UnavailableSource),
    };

    let (delivery, mut results) = DeliveryQueue::channel();
    let mut reader = Reader::new(options.reader_config(), store, source, delivery);
    reader.set_filter_start_date(
        options
            .since
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
    );

    let events = transport.subscribe().await?;
    // the delivery channel closes when the reader is dropped at the end of the task
    let reader_task = tokio::spawn(async move {
        reader.run(events).await;
        reader.debug_description()
    });

    let formatter = InfluxDbFormatter::new(options.influxdb_measurement.clone(), options.unit);
    let serial = options.serial_number();

    while let Some(event) = results.recv().await {
        match event {
            ReaderEvent::Reading(ReadingResult::NewData(samples)) => {
                for sample in &samples {
                    write_sample(&formatter, sample, &serial, out)?;
                }
            }
            ReaderEvent::Reading(ReadingResult::NoData) => {}
            ReaderEvent::Reading(ReadingResult::Error(error)) => {
                if options.verbose {
                    writeln!(err, "error: {error}")?;
                }
            }
            ReaderEvent::Notification(notification) => {
                if options.verbose {
                    writeln!(err, "{notification}")?;
                }
            }
        }
    }

    let summary = reader_task.await?;
    if options.verbose {
        writeln!(err, "{summary}")?;
    }

    Ok(())
}
