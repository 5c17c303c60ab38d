//! Benchmark suite for block decoding and calibration.
//!
//! Isolates parsing and glucose conversion from async runtime overhead.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use libre_transmitter::glucose::{from_history_measurements, from_trend_measurements};
use libre_transmitter::measurement::{history_measurements, trend_measurements};
use libre_transmitter::output::influxdb::InfluxDbFormatter;
use libre_transmitter::sensor::crypto::{SensorType, apply_keystream};
use libre_transmitter::sensor::uid::{PatchInfo, SensorUid};
use libre_transmitter::sensor::{SENSOR_DATA_LEN, SensorBlock, crc};
use libre_transmitter::{CalibrationParameters, GlucoseUnit, OutputFormatter};
use std::time::{Duration, SystemTime};

const BENCH_UID: SensorUid = SensorUid([0x2F, 0xE7, 0xB1, 0x00, 0x00, 0xA4, 0x07, 0xE0]);
const LIBRE2_PATCH_INFO: PatchInfo = PatchInfo([0x9D, 0x08, 0x30, 0x01, 0x71, 0x2B]);

/// Ready block with every trend and history record set to `raw`.
fn plain_block(raw: u16, legacy: bool) -> [u8; SENSOR_DATA_LEN] {
    let mut bytes = [0u8; SENSOR_DATA_LEN];
    bytes[4] = 0x03;
    if !legacy {
        for (i, b) in bytes[9..24].iter_mut().enumerate() {
            *b = 0x10 + i as u8;
        }
    }
    bytes[26] = 5;
    bytes[27] = 2;
    bytes[316..318].copy_from_slice(&1000u16.to_le_bytes());
    // 16 trend + 32 history records, 6 bytes each
    for record in bytes[28..316].chunks_exact_mut(6) {
        record[..2].copy_from_slice(&(raw & 0x3FFF).to_le_bytes());
        // raw temperature 7000, stored in units of 4 from bit 26
        let temperature = u32::from(7000u16 >> 2) << 2;
        record[3..5].copy_from_slice(&(temperature as u16).to_le_bytes());
    }
    crc::seal(&mut bytes);
    bytes
}

fn params(fingerprint: u16) -> CalibrationParameters {
    CalibrationParameters {
        slope_slope: 0.000_01,
        slope_offset: 0.1,
        offset_slope: 0.001,
        offset_offset: -20.0,
        extra_slope: 1.0,
        extra_offset: 0.0,
        fingerprint,
    }
}

fn captured_at() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

/// Benchmark block parsing with and without decryption
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_block");
    group.throughput(Throughput::Bytes(SENSOR_DATA_LEN as u64));

    let legacy = plain_block(1200, true);
    group.bench_function("legacy", |b| {
        b.iter(|| {
            let block = SensorBlock::parse(black_box(&legacy), Some(BENCH_UID), None, captured_at());
            black_box(block)
        })
    });

    let mut encrypted = plain_block(1200, false);
    apply_keystream(&mut encrypted, SensorType::Libre2, &BENCH_UID, &LIBRE2_PATCH_INFO);
    group.bench_function("libre2_decrypt", |b| {
        b.iter(|| {
            let block = SensorBlock::parse(
                black_box(&encrypted),
                Some(BENCH_UID),
                Some(LIBRE2_PATCH_INFO),
                captured_at(),
            );
            black_box(block)
        })
    });

    group.bench_function("crc_validate", |b| {
        b.iter(|| black_box(crc::validate(black_box(&legacy))))
    });

    group.finish();
}

/// Benchmark record decoding and calibration of a parsed block
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_block");
    let Ok(block) = SensorBlock::parse(&plain_block(1200, true), Some(BENCH_UID), None, captured_at())
    else {
        panic!("bench block does not parse");
    };
    let params = params(block.fingerprint());
    let serial = block.serial_number().to_string();

    group.throughput(Throughput::Elements(16));
    group.bench_function("trend_all", |b| {
        b.iter(|| {
            let measurements = trend_measurements(black_box(&block));
            black_box(from_trend_measurements(&measurements, &params, &serial, true))
        })
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("trend_newest", |b| {
        b.iter(|| {
            let measurements = trend_measurements(black_box(&block));
            black_box(from_trend_measurements(&measurements, &params, &serial, false))
        })
    });

    group.throughput(Throughput::Elements(32));
    group.bench_function("history", |b| {
        b.iter(|| {
            let measurements = history_measurements(black_box(&block));
            black_box(from_history_measurements(&measurements, &params, &serial))
        })
    });

    group.finish();
}

/// Benchmark formatting decoded samples as line protocol
fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_sample");
    let Ok(block) = SensorBlock::parse(&plain_block(1200, true), Some(BENCH_UID), None, captured_at())
    else {
        panic!("bench block does not parse");
    };
    let measurements = trend_measurements(&block);
    let samples = from_trend_measurements(&measurements, &params(block.fingerprint()), "0MH", false);
    let sample = &samples[0];

    group.throughput(Throughput::Elements(1));
    for (name, unit) in [("mgdl", GlucoseUnit::Mgdl), ("mmol", GlucoseUnit::Mmol)] {
        let formatter = InfluxDbFormatter::new("glucose".to_string(), unit);
        group.bench_function(name, |b| {
            b.iter(|| black_box(formatter.format(black_box(sample), black_box("0MH"))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_decode, bench_format);
criterion_main!(benches);
