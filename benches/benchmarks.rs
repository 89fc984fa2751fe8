//! Performance benchmarks for rswire.
//!
//! Run with: `cargo bench`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rswire::config::{Config, Limits};
use rswire::http::{HeaderTable, HttpReader};
use rswire::protocol::{
    ClientHandshake, Frame, FrameHeader, MessageAssembler, OpCode, apply_mask, apply_mask_fast,
    compute_accept_key, encode_frame,
};
use rswire::url::Url;

const SIZES: [usize; 4] = [10, 1024, 65536, 1024 * 1024];

// =============================================================================
// Frame Codec Benchmarks
// =============================================================================

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");
    let mask = [0x37, 0xfa, 0x21, 0x3d];

    for size in SIZES {
        let payload = vec![0xAB; size];
        let unmasked = encode_frame(true, OpCode::Binary, None, &payload);
        let masked = encode_frame(true, OpCode::Binary, Some(mask), &payload);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode_masked", size), &payload, |b, p| {
            b.iter(|| encode_frame(true, OpCode::Binary, Some(mask), black_box(p)))
        });

        group.bench_with_input(BenchmarkId::new("parse_unmasked", size), &unmasked, |b, w| {
            b.iter(|| Frame::parse(black_box(w)))
        });

        group.bench_with_input(BenchmarkId::new("stream_decode_masked", size), &masked, |b, w| {
            let limits = Limits::default();
            b.iter(|| {
                let mut src: &[u8] = black_box(w);
                let mut header = FrameHeader::read_from(&mut src).unwrap();
                header.read_payload(&mut src, &limits).unwrap()
            })
        });
    }

    group.finish();
}

// =============================================================================
// Masking Benchmarks
// =============================================================================

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("masking");
    let mask = [0x37, 0xfa, 0x21, 0x3d];

    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(BenchmarkId::new("apply_mask", size), |b| {
            let mut data = vec![0xAB; size];
            b.iter(|| apply_mask(black_box(&mut data), mask))
        });

        group.bench_function(BenchmarkId::new("apply_mask_fast", size), |b| {
            let mut data = vec![0xAB; size];
            b.iter(|| apply_mask_fast(black_box(&mut data), mask))
        });
    }

    group.finish();
}

// =============================================================================
// HTTP Reader Benchmarks
// =============================================================================

fn chunked_body(total: usize, chunk: usize) -> Vec<u8> {
    let mut wire = b"HTTP/1.1 200 OK\r\nServer: bench\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    let mut left = total;
    while left > 0 {
        let n = chunk.min(left);
        wire.extend_from_slice(format!("{n:x}\r\n").as_bytes());
        wire.resize(wire.len() + n, b'x');
        wire.extend_from_slice(b"\r\n");
        left -= n;
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}

fn bench_http_reader(c: &mut Criterion) {
    let mut group = c.benchmark_group("http_reader");

    for chunk in [64usize, 4096] {
        let wire = chunked_body(256 * 1024, chunk);
        group.throughput(Throughput::Bytes(256 * 1024));
        group.bench_with_input(BenchmarkId::new("chunked_256kb", chunk), &wire, |b, w| {
            b.iter(|| {
                let mut reader = HttpReader::new(black_box(&w[..]), Limits::default());
                reader.read_head().unwrap();
                reader.read_to_end().unwrap()
            })
        });
    }

    let mut head = b"HTTP/1.1 200 OK\r\n".to_vec();
    for i in 0..20 {
        head.extend_from_slice(format!("X-Header-{i}: value-{i}\r\n").as_bytes());
    }
    head.extend_from_slice(b"Content-Length: 0\r\n\r\n");
    group.bench_function("head_20_fields", |b| {
        b.iter(|| {
            let mut reader = HttpReader::new(black_box(&head[..]), Limits::default());
            reader.read_head().unwrap();
            reader.headers().len()
        })
    });

    let mut table = HeaderTable::new();
    for i in 0..20 {
        table.append(format!("X-Header-{i}"), "v");
    }
    group.bench_function("header_lookup_last", |b| {
        b.iter(|| table.get(black_box("x-header-19")))
    });

    group.finish();
}

// =============================================================================
// Handshake Benchmarks
// =============================================================================

fn bench_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake");

    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    group.bench_function("compute_accept_key", |b| {
        b.iter(|| compute_accept_key(black_box(key)))
    });

    let url = Url::parse("ws://server.example.com/chat?room=1").unwrap();
    let config = Config::default().with_protocol("chat");
    group.bench_function("build_request", |b| {
        b.iter(|| ClientHandshake::with_key(black_box(&url), &config, key.to_string()).unwrap())
    });

    group.finish();
}

// =============================================================================
// Message Reassembly Benchmarks
// =============================================================================

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    group.throughput(Throughput::Bytes(65540));

    group.bench_function("10_fragments_64kb", |b| {
        b.iter(|| {
            let mut assembler = MessageAssembler::new(Limits::default());
            for i in 0..10 {
                let opcode = if i == 0 { OpCode::Binary } else { OpCode::Continuation };
                let header = FrameHeader::new(i == 9, opcode, 6554);
                if let Some(message) = assembler.push(&header, vec![0xAB; 6554]).unwrap() {
                    return message;
                }
            }
            unreachable!("final fragment completes the message")
        })
    });

    group.finish();
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(
    benches,
    bench_frame_codec,
    bench_masking,
    bench_http_reader,
    bench_handshake,
    bench_reassembly
);

criterion_main!(benches);
