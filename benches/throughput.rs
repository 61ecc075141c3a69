//! Throughput Benchmark for milterkit
//!
//! Measures framing, command decoding, dispatch and response encoding on
//! a typical single-recipient SMTP session.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use milterkit::commands::Dispatcher;
use milterkit::filter::LoggingFilter;
use milterkit::protocol::{Command, Frame, FrameBuffer, Response};

/// Frames an MTA sends for one message.
fn session_frames() -> Vec<Frame> {
    vec![
        Frame::new(b'O', Bytes::from_static(&[0, 0, 0, 6, 0, 0, 1, 0xFF, 0, 0, 0, 0])),
        Frame::new(
            b'C',
            Bytes::from_static(b"mail.example.com\x004\x00\x19127.0.0.1\x00"),
        ),
        Frame::new(b'H', Bytes::from_static(b"client.example.com\0")),
        Frame::new(b'M', Bytes::from_static(b"<alice@example.com>\0SIZE=1024\0")),
        Frame::new(b'R', Bytes::from_static(b"<bob@example.com>\0")),
        Frame::new(b'L', Bytes::from_static(b"Subject\0Quarterly numbers\0")),
        Frame::new(b'L', Bytes::from_static(b"From\0Alice <alice@example.com>\0")),
        Frame::new(b'N', Bytes::new()),
        Frame::new(b'B', Bytes::from("x".repeat(4096))),
        Frame::new(b'E', Bytes::new()),
        Frame::new(b'Q', Bytes::new()),
    ]
}

fn session_bytes() -> Vec<u8> {
    let mut wire = Vec::new();
    for frame in session_frames() {
        frame.serialize_into(&mut wire).unwrap();
    }
    wire
}

/// Benchmark frame reassembly
fn bench_framing(c: &mut Criterion) {
    let wire = session_bytes();

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(wire.len() as u64));

    group.bench_function("single_chunk", |b| {
        b.iter(|| {
            let mut frames = FrameBuffer::new();
            frames.feed(&wire);
            while let Ok(Some(frame)) = frames.next_frame() {
                black_box(frame);
            }
        });
    });

    group.bench_function("small_chunks", |b| {
        b.iter(|| {
            let mut frames = FrameBuffer::new();
            for chunk in wire.chunks(7) {
                frames.feed(chunk);
                while let Ok(Some(frame)) = frames.next_frame() {
                    black_box(frame);
                }
            }
        });
    });

    group.finish();
}

/// Benchmark payload decoding
fn bench_decode(c: &mut Criterion) {
    let frames = session_frames();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(frames.len() as u64));

    group.bench_function("session_commands", |b| {
        b.iter(|| {
            for frame in &frames {
                black_box(Command::decode(frame).ok());
            }
        });
    });

    group.finish();
}

/// Benchmark full dispatch through a filter
fn bench_dispatch(c: &mut Criterion) {
    let frames = session_frames();

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("full_session", |b| {
        b.iter(|| {
            let mut dispatcher = Dispatcher::new(LoggingFilter::new());
            for frame in &frames {
                black_box(dispatcher.handle_frame(frame).ok());
            }
        });
    });

    group.finish();
}

/// Benchmark response encoding
fn bench_responses(c: &mut Criterion) {
    let responses = vec![
        Response::add_header("X-Scanned", "yes"),
        Response::change_header("Subject", "[SPAM] Quarterly numbers", 1),
        Response::replace_body(Bytes::from("y".repeat(4096))),
        Response::Continue,
    ];

    let mut group = c.benchmark_group("responses");
    group.throughput(Throughput::Elements(responses.len() as u64));

    group.bench_function("serialize_batch", |b| {
        let mut out = Vec::with_capacity(8192);
        b.iter(|| {
            out.clear();
            for response in &responses {
                response.serialize_into(&mut out).unwrap();
            }
            black_box(out.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_framing,
    bench_decode,
    bench_dispatch,
    bench_responses,
);

criterion_main!(benches);
