//! Hub fan-out benchmark suite.
//!
//! Measures one broadcast round trip through the hub event loop at
//! different subscriber counts, and the reading parser on its own.
//!
//! Run with: cargo bench --bench hub_broadcast
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serial_scale_bridge::transport::{ClientSession, ConnectionHub};
use serial_scale_bridge::{Message, ScaleDataPayload, ScaleReading};
use tokio::runtime::Runtime;
use tracing::Span;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const SUBSCRIBER_COUNTS: &[usize] = &[1, 16, 128, 512];

const QUEUE_CAPACITY: usize = 4096;

const SAMPLE_LINE: &str = "WTST    12.345   kg";

// ============================================================================
// Benchmark: Broadcast
// ============================================================================

fn bench_broadcast(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("hub_broadcast");

    for &count in SUBSCRIBER_COUNTS {
        let hub = rt.block_on(populated_hub(count));

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("scale_data", count), &count, |b, _| {
            b.to_async(&rt).iter(|| async {
                let delivered = hub.broadcast(sample_message()).await.expect("hub open");
                black_box(delivered);
            });
        });

        hub.shutdown();
    }

    group.finish();
}

// ============================================================================
// Benchmark: Parse + Encode
// ============================================================================

fn bench_parse_encode(c: &mut Criterion) {
    c.bench_function("parse_and_encode", |b| {
        b.iter(|| {
            let message = sample_message();
            black_box(message.encode().expect("encodes"));
        });
    });
}

// ============================================================================
// Helpers
// ============================================================================

fn sample_message() -> Message {
    let reading = ScaleReading::parse(black_box(SAMPLE_LINE)).expect("valid line");
    Message::scale_data(ScaleDataPayload::now(reading, SAMPLE_LINE, "/dev/ttyUSB0"))
}

/// Registers `count` sessions, each drained by its own task.
async fn populated_hub(count: usize) -> ConnectionHub {
    let hub = ConnectionHub::new(Span::none());

    for _ in 0..count {
        let (session, mut rx) = ClientSession::new(QUEUE_CAPACITY);
        hub.register(session).await.expect("hub open");
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
    }

    hub
}

criterion_group!(benches, bench_broadcast, bench_parse_encode);
criterion_main!(benches);
