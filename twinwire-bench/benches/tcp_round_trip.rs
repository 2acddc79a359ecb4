//! TCP round-trip benchmarks over loopback.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;
use twinwire_bench::fixtures::{PAYLOAD_SIZES, sample_message};
use twinwire_transport::{TcpAcceptor, TcpConfig, TcpConnection};

fn benchmark_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("tcp");
    group.throughput(Throughput::Elements(1));

    for size in PAYLOAD_SIZES {
        let message = sample_message(size).unwrap();
        let (mut client, mut server) = rt.block_on(async {
            let config = TcpConfig::new("127.0.0.1", 0).max_message_size(size);
            let acceptor = TcpAcceptor::bind(config.clone()).await.unwrap();
            let port = acceptor.local_addr().unwrap().port();
            let (accepted, connected) = tokio::join!(
                acceptor.accept(),
                TcpConnection::connect(TcpConfig { port, ..config })
            );
            (connected.unwrap(), accepted.unwrap())
        });

        group.bench_with_input(BenchmarkId::new("round_trip", size), &message, |b, m| {
            b.iter(|| {
                rt.block_on(async {
                    client.send(black_box(m)).await.unwrap();
                    let echoed = server.receive_timeout(Duration::from_secs(1)).await.unwrap();
                    server.send(&echoed).await.unwrap();
                    black_box(client.receive_timeout(Duration::from_secs(1)).await.unwrap())
                })
            })
        });

        rt.block_on(async {
            client.close().await;
            server.close().await;
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_round_trip);
criterion_main!(benches);
