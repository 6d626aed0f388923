//! Benchmarks for the streaming hashers.
//!
//! Run with: cargo bench -p imprint-core

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use imprint_core::checksum::{checksum_source, ChecksumType, Checksummer, HashWidth};
use imprint_core::{Config, Memory};
use std::hint::black_box;

/// Generate test data of the specified size
fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

const SIZES: [(usize, &str); 3] = [
    (64 * 1024, "64KB"),
    (1024 * 1024, "1MB"),
    (16 * 1024 * 1024, "16MB"),
];

/// Image checksum at both widths
fn bench_checksummer(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksummer");

    for (size, size_name) in SIZES {
        let data = generate_test_data(size);
        group.throughput(Throughput::Bytes(size as u64));

        for (width, width_name) in [(HashWidth::Bits64, "xxh64"), (HashWidth::Bits32, "xxh32")] {
            group.bench_with_input(BenchmarkId::new(width_name, size_name), &data, |b, data| {
                b.iter(|| {
                    let mut checksummer = Checksummer::with_width(width);
                    for chunk in data.chunks(64 * 1024) {
                        checksummer.update(black_box(chunk));
                    }
                    checksummer.hex_digest()
                });
            });
        }
    }

    group.finish();
}

/// Blockmap range digests
fn bench_range_digests(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_digest");

    for (size, size_name) in SIZES {
        let data = generate_test_data(size);
        group.throughput(Throughput::Bytes(size as u64));

        for (checksum_type, name) in [(ChecksumType::Sha256, "sha256"), (ChecksumType::Md5, "md5")] {
            group.bench_with_input(BenchmarkId::new(name, size_name), &data, |b, data| {
                b.iter(|| checksum_type.digest_hex(black_box(data)));
            });
        }
    }

    group.finish();
}

/// Full read stream plus hashing over an in-memory source
fn bench_checksum_source(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum_source");
    let config = Config::default();

    for (size, size_name) in SIZES {
        let data = generate_test_data(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("memory", size_name), &data, |b, data| {
            b.iter(|| {
                let mut source = Memory::new(data.clone());
                checksum_source(&mut source, Some(size as u64), &config, None).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_checksummer,
    bench_range_digests,
    bench_checksum_source
);
criterion_main!(benches);
