//! Codec benchmarks for ortc-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ortc_protocol::{codec, multipart, Command, MAX_MESSAGE_SIZE};

fn bench_encode_send(c: &mut Criterion) {
    let payload = format!("Ab3dE6gH_1-1_{}", "x".repeat(64));
    let command = Command::send("app-key", "token", "chat:lobby", "", payload);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("send_64B", |b| b.iter(|| codec::encode(black_box(&command))));
    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let inner = format!(
        r#"{{"ch":"chat:lobby","m":"Ab3dE6gH_1-1_{}"}}"#,
        "x".repeat(64)
    );
    let frame = format!("a[{}]", serde_json::to_string(&inner).unwrap());

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("message_64B", |b| b.iter(|| codec::decode(black_box(&frame))));
    group.finish();
}

fn bench_split_large(c: &mut Criterion) {
    let message = "y".repeat(MAX_MESSAGE_SIZE * 8 + 17);

    c.bench_function("split_6417_chars", |b| {
        b.iter(|| multipart::encode_parts("Ab3dE6gH", black_box(&message), MAX_MESSAGE_SIZE))
    });
}

criterion_group!(
    benches,
    bench_encode_send,
    bench_decode_message,
    bench_split_large
);
criterion_main!(benches);
