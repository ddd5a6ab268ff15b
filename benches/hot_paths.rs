use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bluewatch::chunk::MessageChunk;
use bluewatch::parse::{group_by_depth, parse_chunk};

const HEADER: &str =
    "> HCI Event: Extended Inquiry Result (0x2f) plen 255  [hci0] 2024-05-12 21:03:50.123456";

fn inquiry_chunk() -> MessageChunk {
    let mut lines = vec![HEADER.to_string()];
    lines.extend(
        [
            "        Num responses: 1",
            "        Address: AA:BB:CC:DD:EE:FF (Vendor X)",
            "        Page scan repetition mode: R1 (0x01)",
            "        RSSI: -76 dBm (0xb4)",
            "        Name (complete): Vendor Phone",
            "        Class: 0x7a020c",
            "          Major class: Phone (cellular, cordless, payphone, modem)",
            "          Minor class: Smart phone",
            "        16-bit Service UUIDs (complete): 1 entry",
            "          Headset (0x1108)",
            "        128-bit Service UUIDs (complete): 1 entry",
            "          2d8d2466-e14d-451c-88bc-7301abea291a",
        ]
        .iter()
        .map(|l| (*l).to_string()),
    );
    MessageChunk::from_lines(lines).expect("valid header")
}

fn bench_group_by_depth(c: &mut Criterion) {
    let chunk = inquiry_chunk();
    let refs: Vec<&str> = chunk.body().iter().map(String::as_str).collect();

    c.bench_function("group_by_depth/inquiry", |b| {
        b.iter(|| group_by_depth(black_box(&refs)))
    });
}

fn bench_parse_chunk(c: &mut Criterion) {
    let chunk = inquiry_chunk();

    c.bench_function("parse_chunk/inquiry", |b| {
        b.iter(|| parse_chunk(black_box(&chunk)))
    });
}

criterion_group!(benches, bench_group_by_depth, bench_parse_chunk);
criterion_main!(benches);
