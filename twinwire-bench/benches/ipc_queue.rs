//! Shared queue benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use twinwire_bench::fixtures::{PAYLOAD_SIZES, ipc_config, sample_message};
use twinwire_bench::throughput::fill_drain;
use twinwire_transport::SharedQueue;

fn benchmark_send_recv(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("ipc_queue");
    group.throughput(Throughput::Elements(1));

    for size in PAYLOAD_SIZES {
        let message = sample_message(size).unwrap();
        let config = ipc_config(dir.path(), &format!("send-recv-{size}"), 1024, size);
        let mut queue = SharedQueue::open(config).unwrap();

        group.bench_with_input(BenchmarkId::new("send_recv", size), &message, |b, m| {
            b.iter(|| {
                queue.try_send(black_box(m)).unwrap();
                black_box(queue.try_recv().unwrap())
            })
        });
    }

    group.finish();
}

fn benchmark_fill_drain(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("ipc_queue");

    let message = sample_message(256).unwrap();
    let mut queue = SharedQueue::open(ipc_config(dir.path(), "fill-drain", 1024, 256)).unwrap();

    group.throughput(Throughput::Elements(4096));
    group.bench_function("fill_drain_4096", |b| {
        b.iter(|| black_box(fill_drain(&mut queue, &message, 4096).unwrap()))
    });

    group.finish();
}

fn benchmark_empty_poll(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut queue = SharedQueue::open(ipc_config(dir.path(), "empty-poll", 16, 64)).unwrap();

    c.bench_function("ipc_queue_empty_poll", |b| {
        b.iter(|| black_box(queue.try_recv().is_err()))
    });
}

criterion_group!(
    benches,
    benchmark_send_recv,
    benchmark_fill_drain,
    benchmark_empty_poll,
);
criterion_main!(benches);
