//! Performance benchmarks for WaaV Relay
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use waav_relay::core::realtime::{
    MessageBuffer, RelayDefaults, SessionProcessor, ToolRegistry, message_type,
};

fn audio_append(audio_bytes: usize) -> String {
    json!({
        "type": "input_audio_buffer.append",
        "audio": "A".repeat(audio_bytes),
    })
    .to_string()
}

/// Type sniffing against a full parse on audio-sized messages
fn bench_type_sniffing(c: &mut Criterion) {
    let mut group = c.benchmark_group("type_sniffing");
    group.measurement_time(Duration::from_secs(5));

    for size in [1_024, 32_768, 262_144] {
        let message = audio_append(size);
        group.throughput(Throughput::Bytes(message.len() as u64));

        group.bench_with_input(BenchmarkId::new("sniff", size), &message, |b, msg| {
            b.iter(|| message_type(black_box(msg.as_bytes())));
        });

        group.bench_with_input(BenchmarkId::new("full_parse", size), &message, |b, msg| {
            b.iter(|| {
                let value: serde_json::Value = serde_json::from_str(black_box(msg)).unwrap();
                value["type"].as_str().map(str::to_owned)
            });
        });
    }

    group.finish();
}

/// Upstream transform on the hot path (audio deltas pass through)
fn bench_upstream_passthrough(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let processor = Arc::new(SessionProcessor::new(
        Arc::new(ToolRegistry::new()),
        Arc::new(RelayDefaults::default()),
    ));

    let delta = json!({
        "type": "response.audio.delta",
        "item_id": "item_1",
        "delta": "B".repeat(16_384),
    })
    .to_string();

    let mut group = c.benchmark_group("upstream_transform");
    group.throughput(Throughput::Bytes(delta.len() as u64));
    group.bench_function("audio_delta", |b| {
        b.to_async(&runtime).iter(|| {
            let processor = Arc::clone(&processor);
            let buffer = MessageBuffer::text(delta.clone());
            async move { processor.process_upstream_message(black_box(buffer)).await }
        });
    });
    group.finish();
}

/// Client transform rewriting session.update
fn bench_session_update(c: &mut Criterion) {
    let processor = SessionProcessor::new(
        Arc::new(ToolRegistry::new()),
        Arc::new(RelayDefaults::default()),
    );
    let update = json!({
        "type": "session.update",
        "session": {
            "instructions": "client",
            "voice": "alloy",
            "turn_detection": {"type": "server_vad", "threshold": 0.5}
        }
    })
    .to_string();

    c.bench_function("session_update_rewrite", |b| {
        b.iter(|| processor.process_client_message(MessageBuffer::text(black_box(update.clone()))));
    });
}

criterion_group!(
    benches,
    bench_type_sniffing,
    bench_upstream_passthrough,
    bench_session_update
);
criterion_main!(benches);
