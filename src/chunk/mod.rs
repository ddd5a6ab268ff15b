//! Chunk assembly for the raw monitor trace.
//!
//! Groups the line-oriented trace into message chunks, one per controller
//! event. Boundaries are decided only by header-line pattern matching,
//! never by blank lines or line counts, and each chunk carries a
//! `last_seen` timestamp derived from its own header line.

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stats::PipelineStats;

/// Marker preceding the event name in a monitor header line.
const EVENT_MARKER: &str = "HCI Event: ";

/// Event names that open a chunk at top level.
const CHUNK_STARTERS: &[&str] = &[
    "Connect Complete",
    "Role Change",
    "Extended Inquiry",
    "Inquiry Result",
];

/// Meta-event header that opens a chunk only for selected sub-events.
const LE_META_EVENT: &str = "LE Meta Event";

/// Sub-events of `LE Meta Event` that qualify its header as a chunk start.
const LE_META_STARTERS: &[&str] = &["LE Connection Complete", "LE Advertising Report"];

/// Timestamp layout embedded at the end of header lines (`btmon -T`).
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Errors local to chunk assembly. These drop the offending chunk and never
/// terminate the stage.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("chunk has no header line")]
    Empty,

    #[error("header line has no embedded timestamp: {header}")]
    MissingTimestamp { header: String },

    #[error("unparseable header timestamp: {raw}")]
    InvalidTimestamp { raw: String },
}

/// One assembled message block corresponding to a single controller event.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunk {
    lines: Vec<String>,
    /// Epoch seconds parsed from the header line's embedded timestamp.
    pub last_seen: i64,
}

impl MessageChunk {
    /// Build a chunk from raw lines, deriving `last_seen` from the first
    /// line (the event header).
    pub fn from_lines(lines: Vec<String>) -> Result<Self, ChunkError> {
        let header = lines.first().ok_or(ChunkError::Empty)?;
        let last_seen = parse_header_timestamp(header)?;
        Ok(Self { lines, last_seen })
    }

    /// The event header line.
    pub fn header(&self) -> &str {
        &self.lines[0]
    }

    /// Body lines (the header discarded before parsing).
    pub fn body(&self) -> &[String] {
        &self.lines[1..]
    }
}

/// Whether `line` starts a new chunk. The `next` line is consulted only for
/// `LE Meta Event` headers, which qualify solely when followed immediately
/// by a connection-complete or advertising report.
pub fn starts_chunk(line: &str, next: Option<&str>) -> bool {
    let Some(idx) = line.find(EVENT_MARKER) else {
        return false;
    };
    let event = &line[idx + EVENT_MARKER.len()..];

    if CHUNK_STARTERS.iter().any(|p| event.starts_with(p)) {
        return true;
    }

    if event.starts_with(LE_META_EVENT) {
        return next
            .map(|n| {
                let t = n.trim_start();
                LE_META_STARTERS.iter().any(|p| t.starts_with(p))
            })
            .unwrap_or(false);
    }

    false
}

/// Parse the trailing `YYYY-MM-DD HH:MM:SS.ffffff` timestamp from a header
/// line into epoch seconds, interpreting it in local time.
fn parse_header_timestamp(header: &str) -> Result<i64, ChunkError> {
    let mut tokens = header.split_whitespace().rev();
    let (Some(time), Some(date)) = (tokens.next(), tokens.next()) else {
        return Err(ChunkError::MissingTimestamp {
            header: header.to_string(),
        });
    };

    let raw = format!("{date} {time}");
    let naive = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
        .map_err(|_| ChunkError::InvalidTimestamp { raw: raw.clone() })?;

    naive
        .and_local_timezone(Local)
        .single()
        .map(|dt| dt.timestamp())
        .ok_or(ChunkError::InvalidTimestamp { raw })
}

/// Incremental chunk assembler. Feed lines in order (with one line of
/// lookahead); boundaries close the current buffer.
#[derive(Default)]
pub struct Assembler {
    current: Vec<String>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns the closed chunk when `line` starts a new one
    /// and the buffer held a previous event.
    pub fn feed(
        &mut self,
        line: String,
        next: Option<&str>,
    ) -> Option<Result<MessageChunk, ChunkError>> {
        let closed = if starts_chunk(&line, next) {
            self.close()
        } else {
            None
        };
        self.current.push(line);
        closed
    }

    /// Flush the trailing buffer at end of stream.
    pub fn finish(&mut self) -> Option<Result<MessageChunk, ChunkError>> {
        self.close()
    }

    fn close(&mut self) -> Option<Result<MessageChunk, ChunkError>> {
        if self.current.is_empty() {
            return None;
        }
        let lines = std::mem::take(&mut self.current);
        Some(MessageChunk::from_lines(lines))
    }
}

/// Chunk assembly worker: consumes raw lines until the channel closes,
/// emitting chunks downstream. Malformed chunks are dropped and counted;
/// the stage itself never terminates on input errors.
pub async fn run(
    rx: &mut mpsc::Receiver<String>,
    tx: &mpsc::Sender<MessageChunk>,
    stats: &PipelineStats,
) {
    let mut assembler = Assembler::new();

    let mut hold = rx.recv().await;
    while let Some(line) = hold.take() {
        hold = rx.recv().await;

        if let Some(result) = assembler.feed(line, hold.as_deref()) {
            if !emit(result, tx, stats).await {
                return;
            }
        }
    }

    if let Some(result) = assembler.finish() {
        let _ = emit(result, tx, stats).await;
    }

    debug!("trace stream ended, chunk assembler stopping");
}

async fn emit(
    result: Result<MessageChunk, ChunkError>,
    tx: &mpsc::Sender<MessageChunk>,
    stats: &PipelineStats,
) -> bool {
    match result {
        Ok(chunk) => {
            stats.record_chunk();
            tx.send(chunk).await.is_ok()
        }
        Err(e) => {
            warn!(error = %e, "dropping chunk with unparseable header");
            stats.record_chunk_dropped();
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "> HCI Event: Connect Complete (0x03) plen 11       [hci0] 2024-05-12 21:02:45.342084";

    #[test]
    fn test_starts_chunk_top_level_headers() {
        for event in [
            "Connect Complete (0x03) plen 11",
            "Role Change (0x12) plen 8",
            "Extended Inquiry Result (0x2f) plen 255",
            "Inquiry Result (0x02) plen 15",
            "Inquiry Result with RSSI (0x22) plen 15",
        ] {
            let line = format!("> HCI Event: {event}  [hci0] 2024-05-12 21:02:45.342084");
            assert!(starts_chunk(&line, None), "{event} should start a chunk");
        }
    }

    #[test]
    fn test_starts_chunk_rejects_non_headers() {
        assert!(!starts_chunk("Bluetooth monitor ver 5.50", None));
        assert!(!starts_chunk(
            "= New Index: 00:1A:7D:DA:71:13 (BR/EDR,USB,hci0)  [hci0] 0.357290",
            None
        ));
        assert!(!starts_chunk(
            "> HCI Event: Disconnect Complete (0x05) plen 4  [hci0] 2024-05-12 21:02:45.342084",
            None
        ));
    }

    #[test]
    fn test_starts_chunk_le_meta_requires_qualifying_sub_event() {
        let header = "> HCI Event: LE Meta Event (0x3e) plen 42  [hci0] 2024-05-12 21:02:45.342084";
        assert!(starts_chunk(header, Some("      LE Advertising Report (0x02)")));
        assert!(starts_chunk(header, Some("      LE Connection Complete (0x01)")));
        assert!(!starts_chunk(header, Some("      LE Channel Selection Algorithm (0x14)")));
        assert!(!starts_chunk(header, None));
    }

    #[test]
    fn test_header_timestamp_parses_and_orders() {
        let a = parse_header_timestamp(
            "> HCI Event: Connect Complete (0x03) plen 11  [hci0] 2024-05-12 21:02:45.342084",
        )
        .expect("timestamp should parse");
        let b = parse_header_timestamp(
            "> HCI Event: Connect Complete (0x03) plen 11  [hci0] 2024-05-12 21:03:46.000001",
        )
        .expect("timestamp should parse");
        assert_eq!(b - a, 61);
    }

    #[test]
    fn test_header_without_timestamp_is_an_error() {
        let err = parse_header_timestamp("Bluetooth monitor ver 5.50").unwrap_err();
        assert!(matches!(err, ChunkError::InvalidTimestamp { .. }));
    }

    #[test]
    fn test_assembler_splits_on_headers_and_flushes_tail() {
        let mut asm = Assembler::new();
        let lines = [
            HEADER.to_string(),
            "        Status: Success (0x00)".to_string(),
            HEADER.to_string(),
            "        Address: AA:BB:CC:DD:EE:FF (Vendor X)".to_string(),
        ];

        let mut chunks = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let next = lines.get(i + 1).map(String::as_str);
            if let Some(result) = asm.feed(line.clone(), next) {
                chunks.push(result.expect("valid header"));
            }
        }
        if let Some(result) = asm.finish() {
            chunks.push(result.expect("valid header"));
        }

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].body().len(), 1);
        assert_eq!(chunks[1].body().len(), 1);
        assert!(chunks[0].last_seen > 0);
    }

    #[test]
    fn test_preamble_before_first_header_is_dropped() {
        let mut asm = Assembler::new();
        let preamble = "Bluetooth monitor ver 5.50".to_string();

        assert!(asm.feed(preamble, Some(HEADER)).is_none());
        let closed = asm
            .feed(HEADER.to_string(), None)
            .expect("boundary should close the preamble buffer");
        assert!(closed.is_err());
    }
}
