use crate::measurement::{HISTORY_COUNT, HISTORY_OFFSET, RECORD_LEN, TREND_COUNT, TREND_OFFSET};
use crate::sensor::crypto::{SensorType, apply_keystream};
use crate::sensor::uid::{PatchInfo, SensorUid};
use crate::sensor::{SENSOR_DATA_LEN, crc};

/// A stable sensor UID for unit tests.
pub const TEST_UID: SensorUid = SensorUid([0x2F, 0xE7, 0xB1, 0x00, 0x00, 0xA4, 0x07, 0xE0]);

/// Patch info of a European Libre 2 sensor.
pub const TEST_PATCH_INFO_LIBRE2: PatchInfo = PatchInfo([0x9D, 0x08, 0x30, 0x01, 0x71, 0x2B]);

/// Raw temperature written into every record unless overridden.
pub const TEST_RAW_TEMPERATURE: u16 = 7000;

/// Encode one 6-byte measurement record.
pub fn encode_record(raw: u16, raw_temperature: u16, adjustment: i16, error: bool) -> [u8; 6] {
    let mut word: u64 = u64::from(raw & 0x3FFF);
    if error {
        word |= 1 << 25;
    }
    word |= u64::from((raw_temperature >> 2) & 0x0FFF) << 26;
    word |= u64::from((adjustment.unsigned_abs() >> 2) & 0x01FF) << 38;
    if adjustment < 0 {
        word |= 1 << 47;
    }
    let mut record = [0u8; RECORD_LEN];
    record.copy_from_slice(&word.to_le_bytes()[..RECORD_LEN]);
    record
}

/// Builds sealed sensor blocks with chosen contents.
///
/// Defaults: state ready, legacy header, 1000 minutes old, trend index 5,
/// history index 2, every trend and history value 1000.
pub struct BlockBuilder {
    bytes: [u8; SENSOR_DATA_LEN],
}

impl BlockBuilder {
    pub fn new() -> Self {
        let mut builder = BlockBuilder {
            bytes: [0u8; SENSOR_DATA_LEN],
        };
        builder.bytes[4] = 0x03;
        builder
            .next_trend_index(5)
            .next_history_index(2)
            .age_minutes(1000)
            .trend(&[1000; TREND_COUNT])
            .history(&[1000; HISTORY_COUNT])
    }

    pub fn state(mut self, state: u8) -> Self {
        self.bytes[4] = state;
        self
    }

    /// Fill header bytes that are zero on legacy sensors.
    pub fn non_legacy_header(mut self) -> Self {
        for (i, b) in self.bytes[9..24].iter_mut().enumerate() {
            *b = 0x10 + i as u8;
        }
        self
    }

    pub fn age_minutes(mut self, minutes: u16) -> Self {
        self.bytes[316..318].copy_from_slice(&minutes.to_le_bytes());
        self
    }

    pub fn max_life_minutes(mut self, minutes: u16) -> Self {
        self.bytes[326..328].copy_from_slice(&minutes.to_le_bytes());
        self
    }

    pub fn next_trend_index(mut self, index: u8) -> Self {
        self.bytes[26] = index;
        self
    }

    pub fn next_history_index(mut self, index: u8) -> Self {
        self.bytes[27] = index;
        self
    }

    pub fn footer_byte(mut self, offset: usize, value: u8) -> Self {
        self.bytes[320 + offset] = value;
        self
    }

    /// Write trend values, most recent first, behind the current trend index.
    pub fn trend(self, values: &[u16]) -> Self {
        let records: Vec<[u8; 6]> = values
            .iter()
            .map(|v| encode_record(*v, TEST_RAW_TEMPERATURE, 0, false))
            .collect();
        self.trend_records(&records)
    }

    pub fn trend_records(mut self, records: &[[u8; 6]]) -> Self {
        let next = usize::from(self.bytes[26]);
        for (i, record) in records.iter().enumerate().take(TREND_COUNT) {
            let slot = (next + 2 * TREND_COUNT - 1 - i) % TREND_COUNT;
            let start = TREND_OFFSET + slot * RECORD_LEN;
            self.bytes[start..start + RECORD_LEN].copy_from_slice(record);
        }
        self
    }

    /// Write history values, most recent first, behind the current history index.
    pub fn history(mut self, values: &[u16]) -> Self {
        let next = usize::from(self.bytes[27]);
        for (i, value) in values.iter().enumerate().take(HISTORY_COUNT) {
            let slot = (next + 2 * HISTORY_COUNT - 1 - i) % HISTORY_COUNT;
            let start = HISTORY_OFFSET + slot * RECORD_LEN;
            self.bytes[start..start + RECORD_LEN].copy_from_slice(&encode_record(
                *value,
                TEST_RAW_TEMPERATURE,
                0,
                false,
            ));
        }
        self
    }

    pub fn build(mut self) -> [u8; SENSOR_DATA_LEN] {
        crc::seal(&mut self.bytes);
        self.bytes
    }

    pub fn encrypt(
        mut plain: [u8; SENSOR_DATA_LEN],
        uid: &SensorUid,
        info: &PatchInfo,
    ) -> [u8; SENSOR_DATA_LEN] {
        apply_keystream(&mut plain, SensorType::from_patch_info(info), uid, info);
        plain
    }
}
