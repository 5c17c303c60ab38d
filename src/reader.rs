//! The reading pipeline.
//!
//! One [`Reader`] serves one transmitter. It consumes [`TransportEvent`]s
//! one at a time and turns every relayed sensor block into exactly one
//! [`ReadingResult`]:
//!
//! 1. parse: decrypt when needed, validate the three region checksums
//! 2. check the sensor lifecycle state
//! 3. resolve calibration parameters, fetching them on a store miss
//! 4. decode and calibrate trend (and optionally history) measurements
//! 5. drop invalid samples and everything at or before the watermark
//! 6. deliver the remaining samples in ascending time order
//!
//! Any failure in steps 1 to 3 ends the cycle with an error and leaves the
//! pipeline state untouched.

use crate::calibration::source::CalibrationSource;
use crate::calibration::store::CalibrationStore;
use crate::calibration::{CalibrationError, CalibrationParameters, Calibrator, DEFAULT_FETCH_TIMEOUT};
use crate::delivery::{DeliveryQueue, ReaderEvent};
use crate::display::{AlarmSchedule, DisplayState, SensorInfo};
use crate::glucose::{self, GlucoseSample, GlucoseUnit, sync_minute, unix_seconds};
use crate::measurement::{history_measurements, trend_measurements};
use crate::notify::{Notification, Notifier};
use crate::queue::LimitedQueue;
use crate::sensor::{SensorBlock, SensorDataError, SensorState};
use crate::transport::{ConnectionState, TransmitterMessage, TransmitterMetadata, TransportEvent};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Why a reading cycle produced no samples.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadingError {
    #[error("Malformed sensor data ({0} bytes)")]
    MalformedData(usize),
    #[error("Sensor data failed checksum validation")]
    ChecksumValidationError,
    #[error("Encrypted sensor of unknown type")]
    EncryptedSensorUnknownType,
    #[error("Sensor has ended ({0})")]
    ExpiredSensor(SensorState),
    #[error("Sensor failed")]
    FailedSensor,
    #[error("Sensor is not ready ({0})")]
    SensorNotReady(SensorState),
    #[error("Invalid calibration data: {0}")]
    InvalidCalibrationData(#[from] CalibrationError),
    #[error("No valid sensor data, the sensor may have been removed")]
    NoValidSensorData,
}

impl From<SensorDataError> for ReadingError {
    fn from(err: SensorDataError) -> Self {
        match err {
            SensorDataError::Malformed(len) => ReadingError::MalformedData(len),
            SensorDataError::EncryptedSensorUnknownType => ReadingError::EncryptedSensorUnknownType,
            SensorDataError::ChecksumValidation(_) => ReadingError::ChecksumValidationError,
        }
    }
}

impl ReadingError {
    /// The error for a lifecycle state readings cannot be taken in.
    pub fn for_state(state: SensorState) -> Option<Self> {
        if state.is_readable() {
            return None;
        }
        match state {
            SensorState::Expired | SensorState::Shutdown => Some(ReadingError::ExpiredSensor(state)),
            SensorState::Failure => Some(ReadingError::FailedSensor),
            _ => Some(ReadingError::SensorNotReady(state)),
        }
    }
}

/// Outcome of one reading cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingResult {
    /// Newly accepted samples, oldest first
    NewData(Vec<GlucoseSample>),
    NoData,
    Error(ReadingError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Deliver all 16 trend minutes instead of only the newest
    pub backfill_from_trend: bool,
    /// Also deliver the 15-minute history records
    pub backfill_from_history: bool,
    /// Keep validated raw blocks for diagnostics
    pub persist_raw_blocks: bool,
    pub raw_block_capacity: usize,
    pub glucose_unit: GlucoseUnit,
    /// Empty cycles tolerated before the sensor is reported as detached
    pub empty_cycle_threshold: u32,
    /// Samples further apart than this get no trend
    pub trend_stale_window: Duration,
    pub calibration_timeout: Duration,
    pub low_battery_percent: u8,
    pub expiry_warning: Duration,
    pub alert_repeat_interval: Duration,
    pub alarm_schedule: Option<AlarmSchedule>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            backfill_from_trend: false,
            backfill_from_history: false,
            persist_raw_blocks: false,
            raw_block_capacity: 5,
            glucose_unit: GlucoseUnit::Mgdl,
            empty_cycle_threshold: 1,
            trend_stale_window: Duration::from_secs(15 * 60),
            calibration_timeout: DEFAULT_FETCH_TIMEOUT,
            low_battery_percent: 20,
            expiry_warning: Duration::from_secs(24 * 3600),
            alert_repeat_interval: Duration::from_secs(30 * 60),
            alarm_schedule: None,
        }
    }
}

pub struct Reader {
    config: ReaderConfig,
    calibrator: Calibrator,
    delivery: DeliveryQueue,
    notifier: Notifier,
    display: watch::Sender<DisplayState>,
    connection_state: ConnectionState,
    last_connected: Option<SystemTime>,
    metadata: Option<TransmitterMetadata>,
    last_block: Option<SensorBlock>,
    latest_backfill: Option<GlucoseSample>,
    empty_cycles: u32,
    filter_start_date: Option<SystemTime>,
    raw_blocks: LimitedQueue<SensorBlock>,
}

impl Reader {
    pub fn new(
        config: ReaderConfig,
        store: Arc<dyn CalibrationStore>,
        source: Arc<dyn CalibrationSource>,
        delivery: DeliveryQueue,
    ) -> Self {
        let (display, _) = watch::channel(DisplayState::default());
        Reader {
            calibrator: Calibrator::new(store, source).with_timeout(config.calibration_timeout),
            notifier: Notifier::new(config.alert_repeat_interval),
            raw_blocks: LimitedQueue::new(config.raw_block_capacity),
            config,
            delivery,
            display,
            connection_state: ConnectionState::default(),
            last_connected: None,
            metadata: None,
            last_block: None,
            latest_backfill: None,
            empty_cycles: 0,
            filter_start_date: None,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    /// The most recent accepted sample.
    pub fn latest_backfill(&self) -> Option<&GlucoseSample> {
        self.latest_backfill.as_ref()
    }

    /// Consecutive cycles that produced no new samples.
    pub fn empty_cycles(&self) -> u32 {
        self.empty_cycles
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn last_connected(&self) -> Option<SystemTime> {
        self.last_connected
    }

    pub fn metadata(&self) -> Option<&TransmitterMetadata> {
        self.metadata.as_ref()
    }

    pub fn last_block(&self) -> Option<&SensorBlock> {
        self.last_block.as_ref()
    }

    /// Validated blocks kept for diagnostics, oldest first.
    pub fn raw_blocks(&self) -> impl Iterator<Item = &SensorBlock> {
        self.raw_blocks.iter()
    }

    pub fn subscribe_display(&self) -> watch::Receiver<DisplayState> {
        self.display.subscribe()
    }

    pub fn display_state(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    /// Samples at or before `date` are never delivered. Used when the host
    /// already holds readings from an earlier run.
    pub fn set_filter_start_date(&mut self, date: Option<SystemTime>) {
        self.filter_start_date = date;
    }

    /// Exclusive lower bound for the dates of newly accepted samples.
    pub fn watermark(&self) -> Option<SystemTime> {
        let latest = self.latest_backfill.as_ref().map(|s| s.start_date);
        latest
            .max(self.filter_start_date)
            .map(|date| date + Duration::from_secs(1))
    }

    /// Process events until the transport closes its channel.
    pub async fn run(&mut self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.process(event).await;
        }
        log::debug!("transport closed");
    }

    pub async fn process(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => self.state_changed(state),
            TransportEvent::Message(message) => self.message(message),
            TransportEvent::SensorData {
                bytes,
                metadata,
                received_at,
            } => {
                let result = self.read(&bytes, metadata, received_at).await;
                self.delivery.send(ReaderEvent::Reading(result));
            }
        }
    }

    fn state_changed(&mut self, state: ConnectionState) {
        log::info!("transmitter state: {state}");
        self.connection_state = state;
        match state {
            ConnectionState::Connected => self.last_connected = Some(SystemTime::now()),
            ConnectionState::PoweredOff => self.notify(Notification::BluetoothPoweredOff),
            _ => {}
        }
        let last_connected = self.last_connected;
        self.display.send_modify(|display| {
            display.transmitter.connection_state = state;
            display.last_connected = last_connected;
        });
    }

    fn message(&mut self, message: TransmitterMessage) {
        match message {
            TransmitterMessage::NewSensor => {
                log::info!("new sensor detected");
                self.notify(Notification::SensorChanged);
            }
            TransmitterMessage::NoSensor => {
                log::info!("no sensor detected");
                self.notify(Notification::SensorNotDetected);
            }
            TransmitterMessage::FrequencyChanged(minutes) => {
                log::info!("transmitter readout interval changed to {minutes} minutes");
            }
        }
    }

    /// Run one reading cycle over a relayed block.
    pub async fn read(
        &mut self,
        bytes: &[u8],
        metadata: TransmitterMetadata,
        received_at: SystemTime,
    ) -> ReadingResult {
        log::debug!("received {} bytes from {metadata}", bytes.len());
        if metadata.battery <= self.config.low_battery_percent {
            self.notify(Notification::LowBattery {
                percent: metadata.battery,
            });
        }

        let previous = self.latest_backfill.clone();
        let result = match self.cycle(bytes, &metadata, received_at).await {
            Ok(accepted) => self.complete(accepted, &metadata),
            Err(error) => {
                log::warn!("reading rejected: {error}");
                if let Some(notification) = Notification::for_error(&error) {
                    self.notify(notification);
                }
                ReadingResult::Error(error)
            }
        };

        self.publish(&metadata, previous.as_ref());
        self.metadata = Some(metadata);
        result
    }

    /// Steps that may reject the block. Returns the filtered samples.
    async fn cycle(
        &mut self,
        bytes: &[u8],
        metadata: &TransmitterMetadata,
        received_at: SystemTime,
    ) -> Result<Vec<GlucoseSample>, ReadingError> {
        let block = SensorBlock::parse(bytes, metadata.uid, metadata.patch_info, received_at)?;
        log::debug!(
            "valid {} block from sensor {}, state {}, age {}",
            block.sensor_type(),
            block.serial_number(),
            block.state(),
            block.human_readable_age()
        );

        let expiry_warning = (self.config.expiry_warning.as_secs() / 60) as u32;
        let minutes_left = block.minutes_left();
        if minutes_left > 0 && minutes_left <= expiry_warning {
            self.notify(Notification::SensorExpiring { minutes_left });
        }

        if let Some(error) = ReadingError::for_state(block.state()) {
            return Err(error);
        }

        if self.config.persist_raw_blocks {
            self.raw_blocks.enqueue(block.clone());
        }
        self.last_block = Some(block.clone());

        let was_cached = self.calibrator.cached(&block).is_some();
        let params = self.calibrator.parameters_for(&block).await?;
        if !was_cached {
            self.notify(Notification::CalibrationSucceeded);
        }

        Ok(self.filter(self.decode(&block, &params)))
    }

    fn decode(&self, block: &SensorBlock, params: &CalibrationParameters) -> Vec<GlucoseSample> {
        let serial = block.serial_number();
        let mut samples = glucose::from_trend_measurements(
            &trend_measurements(block),
            params,
            serial,
            self.config.backfill_from_trend,
        );
        if self.config.backfill_from_history {
            samples.extend(glucose::from_history_measurements(
                &history_measurements(block),
                params,
                serial,
            ));
        }
        samples
    }

    /// Keep valid samples after the watermark, oldest first, one per minute.
    ///
    /// A sample in the same minute as the latest accepted one shares its
    /// sync identifier and is dropped even when its timestamp is later.
    fn filter(&self, samples: Vec<GlucoseSample>) -> Vec<GlucoseSample> {
        let decoded = samples.len();
        let watermark = self.watermark();
        let latest_minute = self.latest_backfill.as_ref().map(|s| sync_minute(s.start_date));
        let mut accepted: Vec<GlucoseSample> = samples
            .into_iter()
            .filter(|s| s.is_state_valid)
            .filter(|s| watermark.is_none_or(|w| s.start_date >= w))
            .filter(|s| latest_minute.is_none_or(|m| sync_minute(s.start_date) > m))
            .collect();
        accepted.sort_by_key(|s| s.start_date);
        accepted.dedup_by(|later, earlier| later.sync_identifier == earlier.sync_identifier);
        log::debug!("{} of {decoded} samples accepted", accepted.len());
        accepted
    }

    fn complete(
        &mut self,
        mut accepted: Vec<GlucoseSample>,
        metadata: &TransmitterMetadata,
    ) -> ReadingResult {
        let Some(newest) = accepted.last_mut() else {
            self.empty_cycles = self.empty_cycles.saturating_add(1);
            log::debug!("no new samples, {} empty cycles in a row", self.empty_cycles);
            if self.empty_cycles > self.config.empty_cycle_threshold {
                self.notify(Notification::SensorDetached);
                return ReadingResult::Error(ReadingError::NoValidSensorData);
            }
            return ReadingResult::NoData;
        };

        if let Some(previous) = &self.latest_backfill {
            newest.trend = newest.trend_from(previous, self.config.trend_stale_window);
        }
        let newest = newest.clone();
        log::debug!("latest backfill set to {newest}");

        self.empty_cycles = 0;
        self.notify(Notification::NewGlucose {
            glucose: newest.glucose,
            unit: self.config.glucose_unit,
            trend: newest.trend,
            battery: Some(metadata.battery),
        });
        self.latest_backfill = Some(newest);
        ReadingResult::NewData(accepted)
    }

    /// Publish everything this cycle learned as one snapshot.
    fn publish(&self, metadata: &TransmitterMetadata, previous: Option<&GlucoseSample>) {
        let accepted = self
            .latest_backfill
            .as_ref()
            .filter(|latest| Some(*latest) != previous);
        self.display.send_modify(|display| {
            display.transmitter.update(metadata);
            display.transmitter.connection_state = self.connection_state;
            if let Some(block) = &self.last_block {
                display.sensor = SensorInfo::from_block(block);
                display.glucose.checksum = block.footer_crc().swap_bytes().to_string();
            }
            if let Some(sample) = accepted {
                display.accept_sample(
                    sample,
                    previous,
                    self.config.glucose_unit,
                    Some(metadata),
                    self.config.alarm_schedule.as_ref(),
                );
            }
        });
    }

    fn notify(&mut self, notification: Notification) {
        if let Some(notification) = self.notifier.admit(notification) {
            log::info!("notification: {notification}");
            self.delivery.send(ReaderEvent::Notification(notification));
        }
    }

    /// Multi-line dump of the reader state for bug reports.
    pub fn debug_description(&self) -> String {
        let na = || "n/a".to_string();
        let calibration = self
            .last_block
            .as_ref()
            .and_then(|block| self.calibrator.cached(block))
            .map_or_else(|| "none".to_string(), |params| format!("{params:?}"));

        let mut lines = vec![
            "## Reader".to_string(),
            format!(
                "Last connected: {}",
                self.last_connected.map_or_else(na, |t| unix_seconds(t).to_string())
            ),
            format!("Connection state: {}", self.connection_state),
            format!(
                "Sensor state: {}",
                self.last_block.as_ref().map_or_else(na, |b| b.state().to_string())
            ),
            format!(
                "Transmitter battery: {}",
                self.metadata.as_ref().map_or_else(na, |m| m.battery_string())
            ),
            format!("Calibration: {calibration}"),
            format!("Empty cycles: {}", self.empty_cycles),
            format!("Raw blocks: {}", self.raw_blocks.len()),
        ];
        lines.extend(self.raw_blocks.iter().map(|block| block.to_hex()));
        lines.join("\n")
    }
}
