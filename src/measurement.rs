//! Raw measurement records decoded from a validated sensor block.
//!
//! The body carries two ring buffers of 6-byte records:
//! - trend: 16 records, one per minute, starting at byte 28
//! - history: 32 records, one per 15 minutes, starting at byte 124
//!
//! Each buffer is indexed by a "next slot" byte in the body header, so the
//! most recent record sits just before that index, wrapping around.

use crate::sensor::SensorBlock;
use std::time::{Duration, SystemTime};

pub const TREND_COUNT: usize = 16;
pub const HISTORY_COUNT: usize = 32;
pub const HISTORY_INTERVAL_MINUTES: u32 = 15;

pub const RECORD_LEN: usize = 6;
pub const TREND_OFFSET: usize = 28;
pub const HISTORY_OFFSET: usize = TREND_OFFSET + TREND_COUNT * RECORD_LEN;

/// Minutes after a history slot boundary before the sensor writes the slot.
const HISTORY_WRITE_DELAY: u32 = 3;

/// One quantized sample read from a trend or history record.
///
/// Record bit layout (little-endian, 48 bits):
/// - `0..14`  raw glucose count
/// - `14..25` quality flags
/// - `25`     error flag
/// - `26..38` raw temperature, in units of 4
/// - `38..47` temperature adjustment, in units of 4
/// - `47`     adjustment sign
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub raw_value: u16,
    pub quality_flags: u16,
    pub has_error: bool,
    pub raw_temperature: u16,
    pub temperature_adjustment: i16,
    /// Minutes before the block was captured
    pub offset_minutes: u32,
    /// Sensor minute counter at which the record was taken
    pub counter: i64,
    pub date: SystemTime,
}

fn bits(word: u64, offset: u32, count: u32) -> u64 {
    (word >> offset) & ((1 << count) - 1)
}

impl Measurement {
    pub fn from_record(record: &[u8], offset_minutes: u32, counter: i64, date: SystemTime) -> Self {
        let mut le = [0u8; 8];
        le[..RECORD_LEN].copy_from_slice(&record[..RECORD_LEN]);
        let word = u64::from_le_bytes(le);

        let adjustment = (bits(word, 38, 9) << 2) as i16;
        Measurement {
            raw_value: bits(word, 0, 14) as u16,
            quality_flags: bits(word, 14, 11) as u16,
            has_error: bits(word, 25, 1) != 0,
            raw_temperature: (bits(word, 26, 12) << 2) as u16,
            temperature_adjustment: if bits(word, 47, 1) != 0 {
                -adjustment
            } else {
                adjustment
            },
            offset_minutes,
            counter,
            date,
        }
    }

    /// A slot the sensor flagged as erroneous, or never filled.
    pub fn is_valid(&self) -> bool {
        !self.has_error && self.raw_value != 0
    }
}

fn minutes_before(date: SystemTime, minutes: u32) -> SystemTime {
    date.checked_sub(Duration::from_secs(u64::from(minutes) * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn record(block: &SensorBlock, base: usize, slot: usize) -> &[u8] {
    let start = base + slot * RECORD_LEN;
    &block.bytes()[start..start + RECORD_LEN]
}

/// The 16 trend measurements, most recent first, one minute apart.
pub fn trend_measurements(block: &SensorBlock) -> Vec<Measurement> {
    let next = block.next_trend_index() % TREND_COUNT;
    let age = i64::from(block.age_minutes());

    (0..TREND_COUNT)
        .map(|i| {
            let slot = (next + 2 * TREND_COUNT - 1 - i) % TREND_COUNT;
            let offset = i as u32;
            Measurement::from_record(
                record(block, TREND_OFFSET, slot),
                offset,
                age - i64::from(offset),
                minutes_before(block.captured_at(), offset),
            )
        })
        .collect()
}

/// Minutes between capture and the most recent history record, or `None`
/// when the sensor is too young to have written one.
fn most_recent_history_offset(block: &SensorBlock) -> Option<u32> {
    let age = block.age_minutes();
    if age < HISTORY_WRITE_DELAY + HISTORY_INTERVAL_MINUTES {
        return None;
    }
    let since_first = age - HISTORY_WRITE_DELAY;
    let delay = since_first % HISTORY_INTERVAL_MINUTES + HISTORY_WRITE_DELAY;
    let index_from_counter = (since_first / HISTORY_INTERVAL_MINUTES) as usize % HISTORY_COUNT;

    if index_from_counter == block.next_history_index() % HISTORY_COUNT {
        Some(delay)
    } else {
        // the index moved ahead of the counter, the newest slot is one
        // interval younger
        Some(delay.saturating_sub(HISTORY_INTERVAL_MINUTES))
    }
}

/// History measurements, oldest first, 15 minutes apart.
///
/// Only slots that the sensor can have written during its lifetime are
/// returned, so a young sensor yields fewer than 32 records.
pub fn history_measurements(block: &SensorBlock) -> Vec<Measurement> {
    let Some(newest_offset) = most_recent_history_offset(block) else {
        return Vec::new();
    };
    let next = block.next_history_index() % HISTORY_COUNT;
    let newest_counter = i64::from(block.age_minutes()) - i64::from(newest_offset);
    let available = (newest_counter / i64::from(HISTORY_INTERVAL_MINUTES)) as usize;
    let count = available.min(HISTORY_COUNT);

    let mut measurements: Vec<Measurement> = (0..count)
        .map(|i| {
            let slot = (next + 2 * HISTORY_COUNT - 1 - i) % HISTORY_COUNT;
            let offset = newest_offset + i as u32 * HISTORY_INTERVAL_MINUTES;
            Measurement::from_record(
                record(block, HISTORY_OFFSET, slot),
                offset,
                i64::from(block.age_minutes()) - i64::from(offset),
                minutes_before(block.captured_at(), offset),
            )
        })
        .collect();
    measurements.reverse();
    measurements
}
