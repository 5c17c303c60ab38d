//! Observable state for user interfaces.
//!
//! The reader publishes a complete [`DisplayState`] through a
//! `tokio::sync::watch` channel. Each publish replaces the whole snapshot,
//! so an observer never sees sensor info from one cycle next to glucose info
//! from another.

use crate::glucose::{GlucoseSample, GlucoseTrend, GlucoseUnit};
use crate::sensor::SensorBlock;
use crate::transport::{ConnectionState, TransmitterMetadata};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransmitterInfo {
    pub name: String,
    pub battery: String,
    pub hardware: String,
    pub firmware: String,
    pub sensor_type: String,
    pub identifier: String,
    pub connection_state: ConnectionState,
}

impl TransmitterInfo {
    pub fn update(&mut self, metadata: &TransmitterMetadata) {
        self.name = metadata.name.clone();
        self.battery = metadata.battery_string();
        self.hardware = metadata.hardware.clone();
        self.firmware = metadata.firmware.clone();
        self.sensor_type = metadata
            .sensor_type()
            .map_or_else(|| "Unknown".to_string(), |t| t.to_string());
        self.identifier = metadata.mac.clone().unwrap_or_else(|| "Unknown".to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorInfo {
    pub serial: String,
    pub state: String,
    pub age: String,
    pub time_left: String,
    /// `None` when unknown or already ended
    pub end_time: Option<SystemTime>,
}

impl SensorInfo {
    pub fn from_block(block: &SensorBlock) -> Self {
        SensorInfo {
            serial: block.serial_number().to_string(),
            state: block.state().to_string(),
            age: block.human_readable_age(),
            time_left: block.human_readable_time_left(),
            end_time: block.end_time(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GlucoseInfo {
    /// Latest accepted value in the configured unit
    pub glucose: String,
    pub date: Option<SystemTime>,
    /// Footer checksum of the last block, as matched against calibrations
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseDisplay {
    pub is_state_valid: bool,
    pub trend: Option<GlucoseTrend>,
    /// Transmitter name and battery percent
    pub battery: Option<(String, u8)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlarmResult {
    #[default]
    None,
    Low,
    High,
}

/// Glucose limits outside of which an alarm is active, mg/dL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmSchedule {
    pub low: f64,
    pub high: f64,
}

impl AlarmSchedule {
    pub fn evaluate(&self, glucose: f64) -> AlarmResult {
        if glucose < self.low {
            AlarmResult::Low
        } else if glucose > self.high {
            AlarmResult::High
        } else {
            AlarmResult::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlarmStatus {
    pub is_alarming: bool,
    pub result: AlarmResult,
}

impl AlarmStatus {
    pub fn evaluate(schedule: Option<&AlarmSchedule>, glucose: f64) -> Self {
        let result = schedule.map_or(AlarmResult::None, |s| s.evaluate(glucose));
        AlarmStatus {
            is_alarming: result != AlarmResult::None,
            result,
        }
    }
}

/// Everything an interface shows about the transmitter and its sensor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayState {
    pub transmitter: TransmitterInfo,
    pub sensor: SensorInfo,
    pub glucose: GlucoseInfo,
    /// `None` until two accepted samples allow a trend
    pub glucose_display: Option<GlucoseDisplay>,
    pub alarm: AlarmStatus,
    pub last_connected: Option<SystemTime>,
}

impl DisplayState {
    /// Record a newly accepted sample. `previous` is the sample it replaces.
    pub fn accept_sample(
        &mut self,
        sample: &GlucoseSample,
        previous: Option<&GlucoseSample>,
        unit: GlucoseUnit,
        metadata: Option<&TransmitterMetadata>,
        schedule: Option<&AlarmSchedule>,
    ) {
        self.glucose.glucose = unit.format(sample.glucose);
        self.glucose.date = Some(sample.start_date);
        self.glucose_display = previous.map(|_| GlucoseDisplay {
            is_state_valid: sample.is_state_valid,
            trend: sample.trend,
            battery: metadata.map(|m| (m.name.clone(), m.battery)),
        });
        self.alarm = AlarmStatus::evaluate(schedule, sample.glucose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(glucose: f64) -> GlucoseSample {
        GlucoseSample {
            start_date: SystemTime::UNIX_EPOCH + Duration::from_secs(60),
            glucose,
            trend: Some(GlucoseTrend::Flat),
            is_state_valid: true,
            sync_identifier: "0M-60".to_string(),
        }
    }

    #[test]
    fn test_alarm_schedule() {
        let schedule = AlarmSchedule { low: 70.0, high: 180.0 };
        assert_eq!(AlarmStatus::evaluate(Some(&schedule), 60.0).result, AlarmResult::Low);
        assert!(AlarmStatus::evaluate(Some(&schedule), 200.0).is_alarming);
        assert_eq!(AlarmStatus::evaluate(Some(&schedule), 100.0), AlarmStatus::default());
        assert_eq!(AlarmStatus::evaluate(None, 20.0), AlarmStatus::default());
    }

    #[test]
    fn test_accept_sample_without_previous_has_no_display() {
        let mut state = DisplayState::default();
        state.accept_sample(&sample(120.0), None, GlucoseUnit::Mgdl, None, None);
        assert_eq!(state.glucose.glucose, "120 mg/dL");
        assert!(state.glucose_display.is_none());
    }

    #[test]
    fn test_accept_sample_with_previous() {
        let metadata = TransmitterMetadata {
            name: "MiaoMiao".to_string(),
            battery: 55,
            ..Default::default()
        };
        let schedule = AlarmSchedule { low: 70.0, high: 100.0 };
        let mut state = DisplayState::default();
        state.accept_sample(
            &sample(120.0),
            Some(&sample(110.0)),
            GlucoseUnit::Mmol,
            Some(&metadata),
            Some(&schedule),
        );
        assert_eq!(state.glucose.glucose, "6.7 mmol/L");
        let display = state.glucose_display.unwrap();
        assert_eq!(display.trend, Some(GlucoseTrend::Flat));
        assert_eq!(display.battery, Some(("MiaoMiao".to_string(), 55)));
        assert_eq!(state.alarm.result, AlarmResult::High);
    }
}
