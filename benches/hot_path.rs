//! Criterion benchmarks for the httptap hot path:
//! - `seq::seq_compare` (wrap-aware sequence ordering)
//! - `ReceiveWindow` insert + confirm (per-segment reassembly)
//! - HTTP cue detection (per-payload classification)
//! - `router::shard_for_packet` (shard routing)

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use httptap::assembler::http::{is_http_reply, is_http_request};
use httptap::assembler::seq::seq_compare;
use httptap::assembler::window::ReceiveWindow;
use httptap::assembler::Segment;
use httptap::pipeline::router::shard_for_packet;

/// Build a realistic TCP/IPv4 frame (Ethernet + IPv4 + TCP, no payload).
fn make_tcp_frame(src_ip: [u8; 4], dst_ip: [u8; 4], src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut pkt = vec![0u8; 54]; // 14 eth + 20 ipv4 + 20 tcp

    // Ethernet
    pkt[0..6].copy_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    pkt[6..12].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    pkt[12] = 0x08;
    pkt[13] = 0x00;

    // IPv4
    let ip = &mut pkt[14..34];
    ip[0] = 0x45;
    let total_len: u16 = 40;
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip[8] = 64;
    ip[9] = 6; // TCP
    ip[12..16].copy_from_slice(&src_ip);
    ip[16..20].copy_from_slice(&dst_ip);

    // TCP
    let tcp = &mut pkt[34..54];
    tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[12] = 0x50;
    tcp[13] = 0x10; // ACK

    pkt
}

fn segment(seq: u32, payload: &[u8]) -> Segment {
    Segment {
        seq,
        ack: 0,
        syn: false,
        ack_flag: false,
        fin: false,
        rst: false,
        payload: payload.to_vec(),
    }
}

fn bench_seq_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("seq_compare");
    group.bench_function("near", |b| {
        b.iter(|| seq_compare(black_box(1000), black_box(2000)))
    });
    group.bench_function("wrap", |b| {
        b.iter(|| seq_compare(black_box(5), black_box(0xFFFF_FFF6)))
    });
    group.finish();
}

fn bench_window(c: &mut Criterion) {
    let payload = vec![0xABu8; 512];
    let mut group = c.benchmark_group("receive_window");
    group.throughput(Throughput::Elements(8));
    group.bench_function("insert_confirm_8_out_of_order", |b| {
        let (tx, rx) = crossbeam_channel::unbounded();
        b.iter(|| {
            let mut window = ReceiveWindow::default();
            for i in (0..8u32).rev() {
                window.insert(segment(1000 + i * 512, &payload));
            }
            window.confirm(1000 + 8 * 512, &tx);
            rx.try_iter().count()
        })
    });
    group.finish();
}

fn bench_http_cues(c: &mut Criterion) {
    let request = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
    let binary = [0x16u8, 0x03, 0x01, 0x02, 0x00, 0x01, 0x00, 0x01, 0xfc, 0x03];

    let mut group = c.benchmark_group("http_cues");
    group.bench_function("request_hit", |b| {
        b.iter(|| is_http_request(black_box(request)))
    });
    group.bench_function("request_miss", |b| {
        b.iter(|| is_http_request(black_box(&binary)))
    });
    group.bench_function("reply_hit", |b| b.iter(|| is_http_reply(black_box(reply))));
    group.finish();
}

fn bench_shard_routing(c: &mut Criterion) {
    let frame = make_tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 5000, 80);
    let mut group = c.benchmark_group("router");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("shard_for_packet", |b| {
        b.iter(|| shard_for_packet(black_box(&frame), black_box(8)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_seq_compare,
    bench_window,
    bench_http_cues,
    bench_shard_routing
);
criterion_main!(benches);
