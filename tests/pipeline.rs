//! Black-box pipeline test: a fixed monitor trace through assembler →
//! parser → merge engine → store.

use std::sync::Arc;

use bluewatch::chunk::{Assembler, MessageChunk};
use bluewatch::config::MergeConfig;
use bluewatch::device::{DeviceDelta, Status, Transport};
use bluewatch::merge::sweep::StatusSweeper;
use bluewatch::merge::MergeEngine;
use bluewatch::parse::{parse_chunk, ParsedAttributes};
use bluewatch::publish::NoopSink;
use bluewatch::stats::PipelineStats;
use bluewatch::store::{DeviceStore, MemoryStore};
use tokio::sync::mpsc;

/// btmon-style trace: version banner and index lines, two classic events
/// for one phone, one LE advertising report, and a trailing event that is
/// not a chunk boundary.
const TRACE: &str = "\
Bluetooth monitor ver 5.50
= Note: Linux version 6.1.0 (x86_64)                                                  0.357286
= New Index: 00:1A:7D:DA:71:13 (BR/EDR,USB,hci0)                               [hci0] 0.357290
> HCI Event: Connect Complete (0x03) plen 11                    [hci0] 2024-05-12 21:02:45.342084
        Status: Success (0x00)
        Handle: 12
        Address: AA:BB:CC:DD:EE:FF (Vendor X)
        Link type: ACL (0x01)
        Encryption: Disabled (0x00)
        LMP version: Bluetooth 4.1 (0x07) - Subversion 1 (0x01)
> HCI Event: Extended Inquiry Result (0x2f) plen 255            [hci0] 2024-05-12 21:03:50.123456
        Num responses: 1
        Address: AA:BB:CC:DD:EE:FF (Vendor X)
        Page scan repetition mode: R1 (0x01)
        RSSI: -76 dBm (0xb4)
        Name (complete): Vendor Phone
        Class: 0x7a020c
          Major class: Phone (cellular, cordless, payphone, modem)
          Minor class: Smart phone
        16-bit Service UUIDs (complete): 1 entry
          Headset (0x1108)
        128-bit Service UUIDs (complete): 1 entry
          2d8d2466-e14d-451c-88bc-7301abea291a
> HCI Event: LE Meta Event (0x3e) plen 42                       [hci0] 2024-05-12 21:04:52.000001
      LE Advertising Report (0x02)
        Address type: Random (0x01)
        Address: 12:34:56:78:9A:BC (Resolvable)
        Flags: 0x06
        TX power: -56 dB
        RSSI: -90 dBm (0xa6)
> HCI Event: Disconnect Complete (0x05) plen 4                  [hci0] 2024-05-12 21:05:00.000000
        Status: Success (0x00)
        Handle: 12
        Reason: Remote user terminated connection (0x13)
";

const PHONE: &str = "AA:BB:CC:DD:EE:FF";
const BEACON: &str = "12:34:56:78:9A:BC";

fn assemble(trace: &str) -> Vec<MessageChunk> {
    let mut assembler = Assembler::new();
    let lines: Vec<&str> = trace.lines().collect();

    let mut chunks = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let next = lines.get(i + 1).copied();
        if let Some(result) = assembler.feed((*line).to_string(), next) {
            if let Ok(chunk) = result {
                chunks.push(chunk);
            }
        }
    }
    if let Some(Ok(chunk)) = assembler.finish() {
        chunks.push(chunk);
    }
    chunks
}

fn merge_all(
    parsed: &[ParsedAttributes],
) -> (Arc<MemoryStore>, Vec<DeviceDelta>, mpsc::UnboundedSender<DeviceDelta>) {
    let store = Arc::new(MemoryStore::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = MergeEngine::new(
        store.clone(),
        tx.clone(),
        Arc::new(NoopSink),
        Arc::new(PipelineStats::new()),
    );

    let mut deltas = Vec::new();
    for batch in parsed {
        if let Some((_, delta)) = engine.merge(batch) {
            deltas.push(delta);
        }
    }
    // Drain the channel too, so both notification paths agree.
    let mut channel_deltas = 0;
    while rx.try_recv().is_ok() {
        channel_deltas += 1;
    }
    assert_eq!(channel_deltas, 0, "engine.merge alone must not publish");

    (store, deltas, tx)
}

#[test]
fn test_trace_assembles_into_per_event_chunks() {
    let chunks = assemble(TRACE);

    // The banner/index preamble is dropped (no parseable timestamp); the
    // trailing Disconnect Complete is not a boundary and rides along with
    // the LE chunk.
    assert_eq!(chunks.len(), 3);
    assert!(chunks[0].header().contains("Connect Complete"));
    assert!(chunks[1].header().contains("Extended Inquiry Result"));
    assert!(chunks[2].header().contains("LE Meta Event"));
    assert_eq!(chunks[1].last_seen - chunks[0].last_seen, 65);
}

#[test]
fn test_each_chunk_resolves_exactly_one_address() {
    for chunk in assemble(TRACE) {
        let parsed = parse_chunk(&chunk);
        let addresses = &parsed.attrs["address"];
        let first = &addresses[0];
        assert!(
            addresses.iter().all(|a| a == first),
            "chunk mixed addresses: {addresses:?}"
        );
    }
}

#[test]
fn test_end_to_end_device_state() {
    let chunks = assemble(TRACE);
    let parsed: Vec<ParsedAttributes> = chunks.iter().map(parse_chunk).collect();
    let (store, deltas, _tx) = merge_all(&parsed);

    assert_eq!(store.all().len(), 2);
    assert_eq!(deltas.len(), 3);

    let phone = store.get(PHONE).expect("classic device recorded");
    assert_eq!(phone.status, Status::Online);
    assert!(phone.classic_mode);
    assert!(!phone.le_mode);
    assert_eq!(phone.name.as_deref(), Some("Vendor Phone"));
    assert_eq!(phone.oui.as_deref(), Some("(Vendor X)"));
    assert_eq!(
        phone.classic_lmp_version.as_deref(),
        Some("Bluetooth 4.1 (0x07) - Subversion 1 (0x01)")
    );
    assert_eq!(
        phone.classic_major_class.as_deref(),
        Some("Phone (cellular, cordless, payphone, modem)")
    );
    assert_eq!(phone.classic_minor_class.as_deref(), Some("Smart phone"));
    assert_eq!(phone.classic_class, vec!["0x7a020c"]);
    assert_eq!(phone.classic_16_bit_service_uuids, vec!["Headset (0x1108)"]);
    assert_eq!(
        phone.classic_128_bit_service_uuids,
        vec!["Unknown (2d8d2466-e14d-451c-88bc-7301abea291a)"]
    );
    assert_eq!(
        phone.classic_rssi.iter().cloned().collect::<Vec<_>>(),
        vec!["-76 dBm (0xb4)"]
    );
    // Both classic observations are 65 seconds apart, so the second
    // last_seen lands despite the rate limit.
    assert_eq!(phone.last_seen, chunks[1].last_seen);

    let beacon = store.get(BEACON).expect("LE device recorded");
    assert!(beacon.le_mode);
    assert!(!beacon.classic_mode);
    assert_eq!(beacon.le_address_type.as_deref(), Some("Random (0x01)"));
    assert_eq!(beacon.le_flags, vec!["0x06"]);
    assert_eq!(beacon.le_tx_power.as_deref(), Some("-56 dB"));
    assert_eq!(
        beacon.le_rssi.iter().cloned().collect::<Vec<_>>(),
        vec!["-90 dBm (0xa6)"]
    );
}

#[test]
fn test_remerging_the_trace_is_idempotent() {
    let chunks = assemble(TRACE);
    let parsed: Vec<ParsedAttributes> = chunks.iter().map(parse_chunk).collect();

    let store = Arc::new(MemoryStore::new());
    let (tx, _rx) = mpsc::unbounded_channel();
    let engine = MergeEngine::new(
        store,
        tx,
        Arc::new(NoopSink),
        Arc::new(PipelineStats::new()),
    );

    for batch in &parsed {
        engine.merge(batch);
    }
    // Identical observations at identical timestamps: no further deltas.
    for batch in &parsed {
        assert!(engine.merge(batch).is_none());
    }
}

#[test]
fn test_sweep_expires_devices_after_merge() {
    let chunks = assemble(TRACE);
    let parsed: Vec<ParsedAttributes> = chunks.iter().map(parse_chunk).collect();
    let (store, _deltas, tx) = merge_all(&parsed);

    let sweeper = StatusSweeper::new(
        store.clone(),
        MergeConfig::default(),
        tx,
        Arc::new(NoopSink),
    );

    let last = chunks[2].last_seen;

    // Four minutes after the LE report: only the LE device has gone silent
    // past its timeout.
    let swept = sweeper.sweep(last + 4 * 60);
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].1.address, BEACON);
    assert_eq!(swept[0].1.transport, Transport::Le);
    assert_eq!(store.get(BEACON).unwrap().status, Status::Offline);
    assert_eq!(store.get(PHONE).unwrap().status, Status::Online);

    // Sixteen minutes on, the classic device expires too.
    let swept = sweeper.sweep(last + 16 * 60);
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].1.address, PHONE);
    assert_eq!(store.get(PHONE).unwrap().status, Status::Offline);
}
