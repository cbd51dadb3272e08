//! Frame codec and reassembly benchmarks.

use aquaclean_protocol::frame::{Frame, FrameHeader, FrameKind, TransactionId};
use aquaclean_protocol::{CollectorEvent, Decoder, Encoder, FrameCollector, DEFAULT_MTU};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn test_body(size: usize) -> Vec<u8> {
    // Zeros force COBS to emit a code byte every few bytes.
    (0..size).map(|i| (i % 5) as u8).collect()
}

fn transaction() -> TransactionId {
    TransactionId::new(3).unwrap()
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [16, 64, 251] {
        let header = FrameHeader::new(FrameKind::Start, transaction()).with_last();
        let frame = Frame::new(header, Bytes::from(test_body(size)));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [16, 64, 251] {
        let header = FrameHeader::new(FrameKind::Start, transaction()).with_last();
        let encoded = Frame::new(header, Bytes::from(test_body(size)))
            .encode()
            .unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(Frame::decode(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_message_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_split");

    for size in [3, 64, 512] {
        let body = test_body(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &body, |b, body| {
            b.iter(|| {
                black_box(Encoder::encode_message(transaction(), false, body, DEFAULT_MTU).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");

    for size in [3, 64, 512] {
        let wire: Vec<u8> = Encoder::encode_message(transaction(), true, &test_body(size), DEFAULT_MTU)
            .unwrap()
            .into_iter()
            .flatten()
            .collect();

        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                let mut collector = FrameCollector::new();
                // Feed in MTU-sized notifications as a BLE stack would.
                for chunk in wire.chunks(DEFAULT_MTU) {
                    decoder.extend(chunk);
                    while let Some(frame) = decoder.decode_frame() {
                        if let CollectorEvent::MessageComplete(message) =
                            collector.on_frame(frame.unwrap())
                        {
                            black_box(message);
                        }
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_message_split,
    bench_reassembly,
);

criterion_main!(benches);
