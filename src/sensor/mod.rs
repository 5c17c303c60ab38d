//! Sensor memory block codec.
//!
//! A transmitter relays the sensor's 344 byte memory block. The block is
//! split into three checksummed regions:
//!
//! | Range | Region | Contents |
//! |---|---|---|
//! | `0..24` | header | CRC, lifecycle state at byte 4 |
//! | `24..320` | body | CRC, trend/history indexes, 16 trend and 32 history records, minute counter |
//! | `320..344` | footer | CRC, maximum wear time at bytes 326..328 |
//!
//! Encrypted generations are decrypted before the checksums are checked, and
//! a block is only ever exposed as a [`SensorBlock`] once all three regions
//! validate.

pub mod crc;
pub mod crypto;
pub mod uid;

use crypto::SensorType;
use std::fmt;
use std::ops::Range;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uid::{PatchInfo, SensorUid};

/// Length of the sensor memory block relayed by the transmitter.
pub const SENSOR_DATA_LEN: usize = 344;

pub const HEADER: Range<usize> = 0..24;
pub const BODY: Range<usize> = 24..320;
pub const FOOTER: Range<usize> = 320..344;

const STATE_OFFSET: usize = 4;
const NEXT_TREND_INDEX_OFFSET: usize = 26;
const NEXT_HISTORY_INDEX_OFFSET: usize = 27;
const AGE_OFFSET: usize = 316;
const MAX_LIFE_OFFSET: usize = 326;

/// Bytes that are always zero in an unencrypted (Libre 1) header.
const LEGACY_ZERO_RANGE: Range<usize> = 9..24;

/// Wear time assumed when the footer does not carry one.
pub const DEFAULT_MAX_LIFE_MINUTES: u32 = 14 * 24 * 60;

/// Errors raised while turning raw bytes into a validated [`SensorBlock`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorDataError {
    /// The buffer is too short to hold a memory block
    #[error("Malformed sensor data: expected 344 bytes, got {0}")]
    Malformed(usize),
    /// The block is encrypted and the sensor generation could not be determined
    #[error("Encrypted sensor of unknown type")]
    EncryptedSensorUnknownType,
    /// At least one region checksum did not match (header, body, footer)
    #[error("Checksum validation failed (header, body, footer valid: {0:?})")]
    ChecksumValidation([bool; 3]),
}

/// Sensor lifecycle state stored at byte 4 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorState {
    NotYetStarted,
    Starting,
    Ready,
    Expired,
    Shutdown,
    Failure,
    Unknown,
}

impl SensorState {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => SensorState::NotYetStarted,
            0x02 => SensorState::Starting,
            0x03 => SensorState::Ready,
            0x04 => SensorState::Expired,
            0x05 => SensorState::Shutdown,
            0x06 => SensorState::Failure,
            _ => SensorState::Unknown,
        }
    }

    /// Readings may only be extracted while the sensor is starting or ready.
    pub fn is_readable(self) -> bool {
        matches!(self, SensorState::Starting | SensorState::Ready)
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SensorState::NotYetStarted => "Not yet started",
            SensorState::Starting => "Starting",
            SensorState::Ready => "Ready",
            SensorState::Expired => "Expired",
            SensorState::Shutdown => "Shut down",
            SensorState::Failure => "Failure",
            SensorState::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// An owned copy of the raw block, scoped to one reading cycle.
///
/// This is the only stage at which the bytes may be mutated (decryption).
#[derive(Debug, Clone)]
pub struct RawFrame {
    bytes: [u8; SENSOR_DATA_LEN],
}

impl RawFrame {
    /// Copy the first [`SENSOR_DATA_LEN`] bytes out of the transport buffer.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SensorDataError> {
        let bytes: [u8; SENSOR_DATA_LEN] = data
            .get(..SENSOR_DATA_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or(SensorDataError::Malformed(data.len()))?;
        Ok(Self { bytes })
    }

    /// Libre 1 sensors leave bytes 9..=23 of the header zeroed.
    pub fn is_likely_legacy_format(&self) -> bool {
        self.bytes[LEGACY_ZERO_RANGE].iter().all(|b| *b == 0)
    }

    pub fn decrypt(&mut self, sensor: SensorType, uid: &SensorUid, info: &PatchInfo) {
        crypto::apply_keystream(&mut self.bytes, sensor, uid, info);
    }

    pub fn bytes(&self) -> &[u8; SENSOR_DATA_LEN] {
        &self.bytes
    }

    /// Validate all three region checksums, consuming the frame.
    pub fn validate(
        self,
        sensor_type: SensorType,
        uid: Option<SensorUid>,
        captured_at: SystemTime,
    ) -> Result<SensorBlock, SensorDataError> {
        let regions = crc::validate(&self.bytes);
        if regions != [true, true, true] {
            return Err(SensorDataError::ChecksumValidation(regions));
        }

        Ok(SensorBlock {
            bytes: self.bytes,
            serial_number: uid.map_or_else(|| "Unknown".to_string(), |u| u.serial_number()),
            sensor_type,
            captured_at,
        })
    }
}

/// A memory block whose three regions passed checksum validation.
///
/// Every accessor is derived from the bytes; nothing can be set
/// independently.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorBlock {
    bytes: [u8; SENSOR_DATA_LEN],
    serial_number: String,
    sensor_type: SensorType,
    captured_at: SystemTime,
}

impl SensorBlock {
    /// Decrypt (when required) and validate a raw block.
    ///
    /// Blocks that look like the legacy layout are never decrypted. Anything
    /// else needs patch info naming a known generation.
    pub fn parse(
        data: &[u8],
        uid: Option<SensorUid>,
        patch_info: Option<PatchInfo>,
        captured_at: SystemTime,
    ) -> Result<Self, SensorDataError> {
        let mut frame = RawFrame::from_bytes(data)?;

        let sensor_type = if frame.is_likely_legacy_format() {
            SensorType::Legacy
        } else {
            match patch_info.map(|info| (SensorType::from_patch_info(&info), info)) {
                Some((SensorType::Unknown, _)) | None => {
                    return Err(SensorDataError::EncryptedSensorUnknownType);
                }
                Some((sensor_type, info)) => {
                    if sensor_type.needs_decryption() {
                        match uid.as_ref() {
                            Some(uid) => frame.decrypt(sensor_type, uid, &info),
                            None => log::warn!("{sensor_type} sensor without UID, not decrypting"),
                        }
                    }
                    sensor_type
                }
            }
        };

        frame.validate(sensor_type, uid, captured_at)
    }

    pub fn bytes(&self) -> &[u8; SENSOR_DATA_LEN] {
        &self.bytes
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    /// Time at which the transmitter delivered this block.
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn state(&self) -> SensorState {
        SensorState::from_byte(self.bytes[STATE_OFFSET])
    }

    /// Footer checksum as computed over the footer (big-endian view of the
    /// stored bytes).
    pub fn footer_crc(&self) -> u16 {
        crc::crc16(&self.bytes[FOOTER][2..]).swap_bytes()
    }

    /// Footer checksum in the byte order calibration parameters are keyed by.
    pub fn fingerprint(&self) -> u16 {
        self.footer_crc().swap_bytes()
    }

    pub fn is_likely_legacy_format(&self) -> bool {
        self.bytes[LEGACY_ZERO_RANGE].iter().all(|b| *b == 0)
    }

    pub fn next_trend_index(&self) -> usize {
        usize::from(self.bytes[NEXT_TREND_INDEX_OFFSET])
    }

    pub fn next_history_index(&self) -> usize {
        usize::from(self.bytes[NEXT_HISTORY_INDEX_OFFSET])
    }

    /// Minutes since the sensor was started.
    pub fn age_minutes(&self) -> u32 {
        u32::from(u16::from_le_bytes([
            self.bytes[AGE_OFFSET],
            self.bytes[AGE_OFFSET + 1],
        ]))
    }

    pub fn max_life_minutes(&self) -> u32 {
        match u16::from_le_bytes([self.bytes[MAX_LIFE_OFFSET], self.bytes[MAX_LIFE_OFFSET + 1]]) {
            0 => DEFAULT_MAX_LIFE_MINUTES,
            minutes => u32::from(minutes),
        }
    }

    pub fn minutes_left(&self) -> u32 {
        self.max_life_minutes().saturating_sub(self.age_minutes())
    }

    /// Expected end of the sensor's life, `None` once it has passed.
    pub fn end_time(&self) -> Option<SystemTime> {
        match self.minutes_left() {
            0 => None,
            left => Some(self.captured_at + Duration::from_secs(u64::from(left) * 60)),
        }
    }

    pub fn human_readable_age(&self) -> String {
        human_readable_minutes(self.age_minutes())
    }

    pub fn human_readable_time_left(&self) -> String {
        human_readable_minutes(self.minutes_left())
    }

    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Format a minute count as days, hours and minutes, skipping leading zeros.
pub fn human_readable_minutes(minutes: u32) -> String {
    let days = minutes / (24 * 60);
    let hours = minutes % (24 * 60) / 60;
    let mins = minutes % 60;
    match (days, hours) {
        (0, 0) => format!("{mins}m"),
        (0, _) => format!("{hours}h {mins}m"),
        _ => format!("{days}d {hours}h {mins}m"),
    }
}
