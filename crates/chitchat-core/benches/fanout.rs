//! Fan-out benchmarks for the memory bus.
//!
//! Measures append cost with a growing number of live subscribers and the
//! cost of replaying a channel log.

use bytes::Bytes;
use chitchat_core::{Bus, MemoryBus, ReplayStart};
use chitchat_protocol::{codec, ChannelMessage, Identity, Subject};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tokio::runtime::Runtime;

fn payload() -> Bytes {
    let message = ChannelMessage::text(Identity::new("u-1", "Bench"), Utc::now(), "x".repeat(64));
    codec::encode(&message).unwrap()
}

/// Benchmark publish with N live subscribers on the channel.
fn bench_publish_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("publish_fanout");
    let subject = Subject::message("bench");
    let payload = payload();

    for subscribers in [0usize, 1, 10, 100] {
        let bus = MemoryBus::new();
        let mut subscriptions = Vec::with_capacity(subscribers);
        rt.block_on(async {
            bus.ensure_channel("bench").await.unwrap();
            for i in 0..subscribers {
                subscriptions.push(
                    bus.subscribe_live(&Subject::channel("bench"), &format!("u-{i}"))
                        .await
                        .unwrap(),
                );
            }
        });

        group.throughput(Throughput::Elements(subscribers.max(1) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    rt.block_on(bus.publish(black_box(&subject), payload.clone()))
                        .unwrap();
                    // Keep queues from growing without bound.
                    for subscription in &mut subscriptions {
                        while rt
                            .block_on(async {
                                tokio::time::timeout(Duration::ZERO, subscription.recv()).await
                            })
                            .is_ok()
                        {}
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark replaying a full channel log.
fn bench_replay(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("replay");
    let subject = Subject::message("bench");

    for entries in [100usize, 1_000] {
        let bus = MemoryBus::new();
        rt.block_on(async {
            bus.ensure_channel("bench").await.unwrap();
            for _ in 0..entries {
                bus.publish(&subject, payload()).await.unwrap();
            }
        });

        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let mut cursor = bus
                        .subscribe_replay(&subject, ReplayStart::Beginning)
                        .await
                        .unwrap();
                    for _ in 0..n {
                        black_box(cursor.next(Duration::from_millis(10)).await.unwrap());
                    }
                    cursor.release();
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_publish_fanout, bench_replay);
criterion_main!(benches);
