//! Benchmarks for the scan-cycle pipeline.
//!
//! Covers record assembly for a single peer, whole batches with a realistic
//! share of foreign peers, and the full run loop fed by a fake scanner.

use clap::Parser;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::SystemTime;
use switchbot_meter_listener::app::{Options, ScanFuture, Scanner, run_with_io};
use switchbot_meter_listener::{
    AllowList, Backend, DeviceRecord, FieldValue, MacAddress, PeerAdvertisement, ScanBatch,
    ScanSettings, decode, process_batch,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

const METER_PAYLOAD: [u8; 8] = [0x00, 0x0D, 0x54, 0x10, 0xE4, 0x07, 0x93, 0x45];

fn meter_peer(last_octet: u8) -> PeerAdvertisement {
    PeerAdvertisement::from_pairs(
        MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, last_octet]),
        [
            ("Flags", FieldValue::from("06")),
            ("Local name", FieldValue::from("WoHand")),
            ("16b Service Data", FieldValue::from("000d5410e4079345")),
        ],
    )
}

fn foreign_peer(last_octet: u8) -> PeerAdvertisement {
    PeerAdvertisement::from_pairs(
        MacAddress([0xDE, 0xAD, 0xBE, 0xEF, 0x00, last_octet]),
        [
            ("Local name", FieldValue::from("LE-Bose")),
            ("16b Service Data", FieldValue::from("2cfe001122")),
            ("Manufacturer", FieldValue::from("4c0010050b1c")),
        ],
    )
}

/// One meter for every `foreign_per_meter` foreign peers.
fn mixed_batch(size: usize, foreign_per_meter: usize) -> Vec<PeerAdvertisement> {
    (0..size)
        .map(|i| {
            let octet = (i % 256) as u8;
            if i % (foreign_per_meter + 1) == 0 {
                meter_peer(octet)
            } else {
                foreign_peer(octet)
            }
        })
        .collect()
}

/// A fake scanner that replays prepared batches.
struct FakeScanner {
    batches: Vec<ScanBatch>,
}

impl Scanner for FakeScanner {
    fn start_scan(&self, _backend: Backend, _settings: ScanSettings) -> ScanFuture<'_> {
        let batches = self.batches.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<ScanBatch>(batches.len().max(1));
            tokio::spawn(async move {
                for batch in batches {
                    let _ = tx.send(batch).await;
                }
            });
            Ok(rx)
        })
    }
}

fn bench_decode(c: &mut Criterion) {
    let captured_at = SystemTime::now();
    c.bench_function("decode_payload", |b| {
        b.iter(|| decode(black_box(&METER_PAYLOAD), captured_at))
    });
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble");
    let captured_at = SystemTime::now();
    let no_override = AllowList::new();
    let allow: AllowList = [MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x00])]
        .into_iter()
        .collect();

    let meter = meter_peer(0);
    let foreign = foreign_peer(0);

    group.bench_function("meter", |b| {
        b.iter(|| DeviceRecord::assemble(black_box(&meter), &no_override, captured_at))
    });
    group.bench_function("foreign", |b| {
        b.iter(|| DeviceRecord::assemble(black_box(&foreign), &no_override, captured_at))
    });
    group.bench_function("meter_with_allow_list", |b| {
        b.iter(|| DeviceRecord::assemble(black_box(&meter), &allow, captured_at))
    });

    group.finish();
}

fn bench_process_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_batch");
    let captured_at = SystemTime::now();
    let allow_list = AllowList::new();

    for size in [10, 100, 1000] {
        let peers = mixed_batch(size, 9);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &peers, |b, peers| {
            b.iter(|| process_batch(black_box(peers), &allow_list, captured_at))
        });
    }

    group.finish();
}

/// The full loop: fake scanner -> assemble -> format -> write
fn bench_run_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_loop");
    let rt = Runtime::new().unwrap();

    for cycles in [1, 10] {
        let batches: Vec<ScanBatch> = (0..cycles)
            .map(|_| ScanBatch {
                captured_at: SystemTime::UNIX_EPOCH,
                peers: mixed_batch(50, 4),
            })
            .collect();

        group.throughput(Throughput::Elements((cycles * 50) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(cycles), &batches, |b, batches| {
            b.iter(|| {
                let scanner = FakeScanner {
                    batches: batches.clone(),
                };
                let options = Options::try_parse_from(["bench"]).unwrap();
                let mut out = Vec::<u8>::with_capacity(8 * 1024);
                let mut err = Vec::<u8>::new();

                rt.block_on(async {
                    run_with_io(options, &scanner, &mut out, &mut err)
                        .await
                        .unwrap();
                });

                black_box(out)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_assemble,
    bench_process_batch,
    bench_run_loop,
);
criterion_main!(benches);
