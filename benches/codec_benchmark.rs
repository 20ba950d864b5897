use std::io::{self, Cursor};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sealvault::crypto;
use sealvault::stream::{self, MIN_CHUNK_SIZE};

fn benchmark_single_shot(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_shot");
    group.sample_size(20);

    for (name, size) in [("1KB", 1024), ("64KB", 64 * 1024), ("1MB", 1024 * 1024)] {
        let payload = vec![0xA5u8; size];
        let blob = crypto::encrypt(&payload, "bench-pass").unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", name), &payload, |b, p| {
            b.iter(|| crypto::encrypt(black_box(p), black_box("bench-pass")).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decrypt", name), &blob, |b, blob| {
            b.iter(|| crypto::decrypt(black_box(blob), black_box("bench-pass")).unwrap());
        });
    }
    group.finish();
}

fn benchmark_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");
    group.sample_size(10);

    // Key derivation dominates small payloads; measure where chunking matters.
    for (name, size) in [("4MB", 4 << 20), ("32MB", 32 << 20)] {
        let payload = vec![0x3Cu8; size];
        let mut sealed = Vec::new();
        stream::encrypt_stream(&mut Cursor::new(&payload), &mut sealed, "bench-pass", MIN_CHUNK_SIZE)
            .unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", name), &payload, |b, p| {
            b.iter(|| {
                stream::encrypt_stream(
                    &mut Cursor::new(black_box(p)),
                    io::sink(),
                    "bench-pass",
                    MIN_CHUNK_SIZE,
                )
                .unwrap()
            });
        });
        group.bench_with_input(BenchmarkId::new("decrypt", name), &sealed, |b, s| {
            b.iter(|| {
                stream::decrypt_stream(&mut Cursor::new(black_box(s)), &mut io::sink(), "bench-pass")
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_single_shot, benchmark_stream);
criterion_main!(benches);
