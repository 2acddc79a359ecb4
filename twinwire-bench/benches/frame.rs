//! Frame encoding benchmarks.

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use twinwire_bench::fixtures::{PAYLOAD_SIZES, sample_message};
use twinwire_core::{decode_frame_bytes, encode_frame, encode_frame_into};

fn benchmark_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    for size in PAYLOAD_SIZES {
        let message = sample_message(size).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &message, |b, m| {
            let mut buf = BytesMut::with_capacity(size + 64);
            b.iter(|| {
                buf.clear();
                encode_frame_into(black_box(m), size, &mut buf).unwrap();
            })
        });
    }

    group.finish();
}

fn benchmark_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    for size in PAYLOAD_SIZES {
        let frame = encode_frame(&sample_message(size).unwrap(), size).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, f| {
            b.iter(|| black_box(decode_frame_bytes(black_box(f.clone()), size).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_frame_encode, benchmark_frame_decode);
criterion_main!(benches);
