//! Integration benchmark for the sensor reading pipeline.
//!
//! Benchmarks the full application loop the way the tests in app.rs drive
//! it: a fake transport relays sealed blocks through run_with_io.

use clap::Parser;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use libre_transmitter::app::{Options, run_with_io};
use libre_transmitter::sensor::uid::SensorUid;
use libre_transmitter::sensor::{SENSOR_DATA_LEN, SensorBlock, crc};
use libre_transmitter::transport::{TransmitterMetadata, TransportError, TransportEvent};
use libre_transmitter::Transport;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

const BENCH_UID: SensorUid = SensorUid([0x2F, 0xE7, 0xB1, 0x00, 0x00, 0xA4, 0x07, 0xE0]);

/// A ready legacy block whose 16 trend records count down from `newest`.
fn sensor_block(newest: u16) -> Vec<u8> {
    let mut bytes = [0u8; SENSOR_DATA_LEN];
    bytes[4] = 0x03; // ready
    bytes[26] = 0; // next trend slot
    bytes[316..318].copy_from_slice(&1000u16.to_le_bytes());
    for i in 0..16u16 {
        let slot = usize::from((15 - i) % 16);
        let start = 28 + slot * 6;
        let raw = newest.saturating_sub(10 * i) & 0x3FFF;
        bytes[start..start + 2].copy_from_slice(&raw.to_le_bytes());
    }
    crc::seal(&mut bytes);
    bytes.to_vec()
}

fn t0() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

/// Calibration export matching the footer of the bench blocks.
fn calibration_source() -> PathBuf {
    let fingerprint = SensorBlock::parse(&sensor_block(1200), Some(BENCH_UID), None, t0())
        .unwrap()
        .fingerprint();
    let path = std::env::temp_dir().join(format!("libre-bench-{}.json", std::process::id()));
    std::fs::write(
        &path,
        format!(
            r#"{{"slope_slope": 0, "slope_offset": 0.1, "offset_slope": 0, "offset_offset": 0, "isValidForFooterWithReverseCRCs": {fingerprint}}}"#
        ),
    )
    .unwrap();
    path
}

/// A fake transport that relays pre-built events, similar to the one in app.rs tests.
struct FakeTransport {
    events: Vec<TransportEvent>,
}

impl FakeTransport {
    /// One block per minute, each reading one unit higher than the last.
    fn from_blocks(count: usize, metadata: &TransmitterMetadata) -> Self {
        let events = (0..count)
            .map(|i| TransportEvent::SensorData {
                bytes: sensor_block(1200 + i as u16),
                metadata: metadata.clone(),
                received_at: t0() + Duration::from_secs(60 * i as u64),
            })
            .collect();
        Self { events }
    }
}

impl Transport for FakeTransport {
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<TransportEvent>, TransportError>> + Send + '_>>
    {
        let events = self.events.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<TransportEvent>(events.len().max(1));
            tokio::spawn(async move {
                for event in events {
                    let _ = tx.send(event).await;
                }
            });
            Ok(rx)
        })
    }
}

fn options(source: &PathBuf, extra: &[&str]) -> Options {
    let mut args = vec![
        "libre-transmitter".to_string(),
        "unused.txt".to_string(),
        "--uid".to_string(),
        BENCH_UID.to_string(),
        "--calibration-source".to_string(),
        source.display().to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    Options::parse_from(args)
}

/// Benchmark the full application pipeline: transport -> parse -> calibrate -> filter -> format -> write
fn bench_app_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_pipeline");
    let rt = Runtime::new().unwrap();
    let source = calibration_source();

    group.throughput(Throughput::Elements(1));
    group.bench_function("single_block", |b| {
        b.iter(|| {
            let options = options(&source, &[]);
            let transport = FakeTransport::from_blocks(1, &options.metadata());
            let mut out = Vec::<u8>::with_capacity(512);
            let mut err = Vec::<u8>::new();

            rt.block_on(async {
                run_with_io(options, &transport, &mut out, &mut err)
                    .await
                    .unwrap();
            });

            black_box(out)
        })
    });

    group.bench_function("single_block_trend_backfill", |b| {
        b.iter(|| {
            let options = options(&source, &["--backfill-from-trend"]);
            let transport = FakeTransport::from_blocks(1, &options.metadata());
            let mut out = Vec::<u8>::with_capacity(512 * 16);
            let mut err = Vec::<u8>::new();

            rt.block_on(async {
                run_with_io(options, &transport, &mut out, &mut err)
                    .await
                    .unwrap();
            });

            debug_assert_eq!(out.iter().filter(|&&b| b == b'\n').count(), 16);

            black_box(out)
        })
    });

    group.finish();
    let _ = std::fs::remove_file(&source);
}

/// Benchmark a stream of consecutive blocks through the full pipeline
fn bench_batch_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_pipeline");
    let rt = Runtime::new().unwrap();
    let source = calibration_source();

    for batch_size in [1, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                let metadata = options(&source, &[]).metadata();
                let transport = FakeTransport::from_blocks(size, &metadata);

                b.iter(|| {
                    let options = options(&source, &[]);
                    let mut out = Vec::<u8>::with_capacity(512 * size);
                    let mut err = Vec::<u8>::new();

                    rt.block_on(async {
                        run_with_io(options, &transport, &mut out, &mut err)
                            .await
                            .unwrap();
                    });

                    black_box(out)
                })
            },
        );
    }

    group.finish();
    let _ = std::fs::remove_file(&source);
}

/// Benchmark repeated identical blocks (realistic reconnect scenario where
/// every block after the first is filtered as already seen)
fn bench_duplicate_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate_pipeline");
    let rt = Runtime::new().unwrap();
    let source = calibration_source();

    let metadata = options(&source, &[]).metadata();
    let events: Vec<TransportEvent> = (0..100)
        .map(|_| TransportEvent::SensorData {
            bytes: sensor_block(1200),
            metadata: metadata.clone(),
            received_at: t0(),
        })
        .collect();
    let transport = FakeTransport { events };

    group.throughput(Throughput::Elements(100));
    group.bench_function("100_identical_blocks", |b| {
        b.iter(|| {
            let options = options(&source, &[]);
            let mut out = Vec::<u8>::with_capacity(512);
            let mut err = Vec::<u8>::new();

            rt.block_on(async {
                run_with_io(options, &transport, &mut out, &mut err)
                    .await
                    .unwrap();
            });

            // Only the first block yields a sample
            debug_assert_eq!(out.iter().filter(|&&b| b == b'\n').count(), 1);

            black_box(out)
        })
    });

    group.finish();
    let _ = std::fs::remove_file(&source);
}

criterion_group!(
    benches,
    bench_app_pipeline,
    bench_batch_pipeline,
    bench_duplicate_pipeline,
);
criterion_main!(benches);
