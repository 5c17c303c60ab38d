//! User-facing notifications raised by the reader.
//!
//! Notifications are fire-and-forget. [`Notifier`] decides which ones are
//! worth raising: a notification is dropped when the previous one raised was
//! of the same kind, and recurring reminders are limited to one per
//! repeat interval.

use crate::glucose::{GlucoseTrend, GlucoseUnit};
use crate::reader::ReadingError;
use crate::sensor::SensorState;
use crate::sensor::human_readable_minutes;
use crate::throttle::Throttle;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    NewGlucose {
        /// mg/dL
        glucose: f64,
        unit: GlucoseUnit,
        trend: Option<GlucoseTrend>,
        battery: Option<u8>,
    },
    LowBattery {
        percent: u8,
    },
    SensorChanged,
    SensorNotDetected,
    SensorExpiring {
        minutes_left: u32,
    },
    BluetoothPoweredOff,
    InvalidSensor(SensorState),
    ChecksumFailure,
    UnsupportedSensor,
    CalibrationSucceeded,
    CalibrationFailed,
    /// Several consecutive readings came out empty.
    SensorDetached,
}

/// Category used for de-duplication and repeat limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    NewGlucose,
    LowBattery,
    SensorChanged,
    SensorNotDetected,
    SensorExpiring,
    BluetoothPoweredOff,
    InvalidSensor,
    ChecksumFailure,
    UnsupportedSensor,
    Calibration,
    SensorDetached,
}

impl NotificationKind {
    /// Kinds that keep being true from one reading to the next.
    fn is_recurring(self) -> bool {
        matches!(self, NotificationKind::LowBattery | NotificationKind::SensorExpiring)
    }
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::NewGlucose { .. } => NotificationKind::NewGlucose,
            Notification::LowBattery { .. } => NotificationKind::LowBattery,
            Notification::SensorChanged => NotificationKind::SensorChanged,
            Notification::SensorNotDetected => NotificationKind::SensorNotDetected,
            Notification::SensorExpiring { .. } => NotificationKind::SensorExpiring,
            Notification::BluetoothPoweredOff => NotificationKind::BluetoothPoweredOff,
            Notification::InvalidSensor(_) => NotificationKind::InvalidSensor,
            Notification::ChecksumFailure => NotificationKind::ChecksumFailure,
            Notification::UnsupportedSensor => NotificationKind::UnsupportedSensor,
            Notification::CalibrationSucceeded | Notification::CalibrationFailed => {
                NotificationKind::Calibration
            }
            Notification::SensorDetached => NotificationKind::SensorDetached,
        }
    }

    /// The single notification category a cycle error maps to, if any.
    pub fn for_error(error: &ReadingError) -> Option<Notification> {
        match error {
            ReadingError::MalformedData(_) => None,
            ReadingError::ChecksumValidationError => Some(Notification::ChecksumFailure),
            ReadingError::EncryptedSensorUnknownType => Some(Notification::UnsupportedSensor),
            ReadingError::ExpiredSensor(state) | ReadingError::SensorNotReady(state) => {
                Some(Notification::InvalidSensor(*state))
            }
            ReadingError::FailedSensor => Some(Notification::InvalidSensor(SensorState::Failure)),
            ReadingError::InvalidCalibrationData(_) => Some(Notification::CalibrationFailed),
            ReadingError::NoValidSensorData => Some(Notification::SensorDetached),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::NewGlucose {
                glucose,
                unit,
                trend,
                battery,
            } => {
                write!(f, "Glucose {}", unit.format(*glucose))?;
                if let Some(trend) = trend {
                    write!(f, " {}", trend.symbol())?;
                }
                if let Some(battery) = battery {
                    write!(f, ", transmitter battery {battery}%")?;
                }
                Ok(())
            }
            Notification::LowBattery { percent } => {
                write!(f, "Transmitter battery is low: {percent}%")
            }
            Notification::SensorChanged => f.write_str("New sensor detected"),
            Notification::SensorNotDetected => f.write_str("No sensor detected"),
            Notification::SensorExpiring { minutes_left } => write!(
                f,
                "Sensor expires in {}",
                human_readable_minutes(*minutes_left)
            ),
            Notification::BluetoothPoweredOff => f.write_str("Bluetooth is powered off"),
            Notification::InvalidSensor(state) => write!(f, "Sensor is not usable: {state}"),
            Notification::ChecksumFailure => f.write_str("Sensor data failed checksum validation"),
            Notification::UnsupportedSensor => f.write_str("Unsupported encrypted sensor"),
            Notification::CalibrationSucceeded => f.write_str("Sensor calibrated"),
            Notification::CalibrationFailed => f.write_str("Sensor calibration failed"),
            Notification::SensorDetached => {
                f.write_str("No valid sensor data, the sensor may have come off")
            }
        }
    }
}

/// Filters notifications before they are delivered.
#[derive(Debug)]
pub struct Notifier {
    last_kind: Option<NotificationKind>,
    reminders: Throttle<NotificationKind>,
}

impl Notifier {
    pub fn new(repeat_interval: Duration) -> Self {
        Notifier {
            last_kind: None,
            reminders: Throttle::new(repeat_interval),
        }
    }

    /// Returns the notification if it should be raised now.
    pub fn admit(&mut self, notification: Notification) -> Option<Notification> {
        let kind = notification.kind();
        if kind != NotificationKind::NewGlucose && self.last_kind == Some(kind) {
            log::debug!("suppressing repeated notification: {notification}");
            return None;
        }
        if kind.is_recurring() && !self.reminders.should_emit(&kind) {
            log::debug!("reminder not due yet: {notification}");
            return None;
        }
        self.last_kind = Some(kind);
        Some(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn glucose(value: f64) -> Notification {
        Notification::NewGlucose {
            glucose: value,
            unit: GlucoseUnit::Mgdl,
            trend: Some(GlucoseTrend::Up),
            battery: Some(80),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_kind_in_a_row_is_suppressed() {
        let mut notifier = Notifier::new(HOUR);
        assert!(notifier.admit(Notification::ChecksumFailure).is_some());
        assert!(notifier.admit(Notification::ChecksumFailure).is_none());
        assert!(notifier.admit(glucose(100.0)).is_some());
        assert!(notifier.admit(Notification::ChecksumFailure).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_glucose_is_never_suppressed() {
        let mut notifier = Notifier::new(HOUR);
        assert!(notifier.admit(glucose(100.0)).is_some());
        assert!(notifier.admit(glucose(101.0)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_kind_waits_for_repeat_interval() {
        let mut notifier = Notifier::new(HOUR);
        assert!(notifier.admit(Notification::LowBattery { percent: 10 }).is_some());
        assert!(notifier.admit(glucose(100.0)).is_some());
        assert!(notifier.admit(Notification::LowBattery { percent: 9 }).is_none());

        tokio::time::advance(HOUR).await;
        assert!(notifier.admit(Notification::LowBattery { percent: 8 }).is_some());
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            Notification::for_error(&ReadingError::ChecksumValidationError),
            Some(Notification::ChecksumFailure)
        );
        assert_eq!(
            Notification::for_error(&ReadingError::ExpiredSensor(SensorState::Expired)),
            Some(Notification::InvalidSensor(SensorState::Expired))
        );
        assert_eq!(
            Notification::for_error(&ReadingError::NoValidSensorData),
            Some(Notification::SensorDetached)
        );
        assert_eq!(Notification::for_error(&ReadingError::MalformedData(3)), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(glucose(108.0).to_string(), "Glucose 108 mg/dL ↗, transmitter battery 80%");
        assert_eq!(
            Notification::SensorExpiring { minutes_left: 90 }.to_string(),
            format!("Sensor expires in {}", human_readable_minutes(90))
        );
    }
}
