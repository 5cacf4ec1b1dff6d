//! Benchmarks for the connection hub and message gateway
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use murmur::storage::{MemoryMessageStore, Message, SqliteMessageStore};
use murmur::websocket::{ConnectionHub, ConnectionId, GatewayConfig, HubConfig, MessageGateway};
use std::sync::Arc;
use tempfile::tempdir;

/// Register `count` connections whose queues are drained in the background
async fn connect_drained(hub: &ConnectionHub, count: usize) {
    for _ in 0..count {
        let (tx, mut rx) = hub.outbound_queue();
        hub.register(ConnectionId::new(), tx).await;
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
    }
}

fn bench_broadcast(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("broadcast");

    for connections in [10, 100, 1000] {
        group.throughput(Throughput::Elements(connections as u64));

        group.bench_function(format!("fan_out_{}", connections), |b| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let hub = ConnectionHub::new(HubConfig {
                        outbound_capacity: 4096,
                        ..HubConfig::default()
                    });
                    connect_drained(&hub, connections).await;

                    let message = Message::new("chat", "benchmark payload", "bench");

                    let start = std::time::Instant::now();

                    for _ in 0..iters {
                        hub.broadcast(black_box(&message)).await;
                    }

                    start.elapsed()
                })
            });
        });
    }

    group.finish();
}

fn bench_gateway(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let raw = r#"{"type":"chat","content":"benchmark payload","sender":"bench"}"#;

    let mut group = c.benchmark_group("gateway");

    group.bench_function("accept_memory", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let hub = ConnectionHub::new(HubConfig::default());
                let gateway = MessageGateway::new(
                    Arc::new(MemoryMessageStore::default()),
                    hub,
                    GatewayConfig::default(),
                );

                let start = std::time::Instant::now();

                for _ in 0..iters {
                    gateway.accept(black_box(raw)).await.unwrap();
                }

                start.elapsed()
            })
        });
    });

    group.bench_function("accept_sqlite", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let dir = tempdir().unwrap();
                let store = SqliteMessageStore::open(dir.path().join("bench.db")).unwrap();
                let hub = ConnectionHub::new(HubConfig::default());
                let gateway = MessageGateway::new(Arc::new(store), hub, GatewayConfig::default());

                let start = std::time::Instant::now();

                for _ in 0..iters {
                    gateway.accept(black_box(raw)).await.unwrap();
                }

                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_gateway);
criterion_main!(benches);
