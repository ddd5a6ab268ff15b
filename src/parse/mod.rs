//! Attribute parsing: one message chunk in, one attribute map out.
//!
//! Stateless across chunks. Structure is recovered from indentation alone
//! (`group_by_depth`), then each group is interpreted by pattern on its
//! first line, recursing through sub-transport markers.

pub mod group;
mod line;

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::chunk::MessageChunk;
use crate::device::Transport;
use crate::stats::PipelineStats;

pub use group::{group_by_depth, line_depth};

/// Attribute key to the ordered sequence of observed raw values.
/// Multiplicity is preserved; merge policy downstream decides what to keep.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// One parsed chunk: its transport mode, derived timestamp, and attributes.
#[derive(Debug, Clone)]
pub struct ParsedAttributes {
    pub mode: Transport,
    pub last_seen: i64,
    pub attrs: AttributeMap,
}

/// Group headers that mark a nested sub-transport block; the marker line is
/// discarded and the remainder re-grouped.
const SUB_TRANSPORT_MARKERS: &[&str] = &["LE", "ATT", "L2CAP"];

/// Parse one chunk into an attribute map. The chunk's header line is
/// already excluded by `MessageChunk::body`.
pub fn parse_chunk(chunk: &MessageChunk) -> ParsedAttributes {
    let body = chunk.body();
    let mode = detect_mode(body);

    let mut attrs = AttributeMap::new();
    let refs: Vec<&str> = body.iter().map(String::as_str).collect();
    parse_groups(&refs, mode, &mut attrs);

    ParsedAttributes {
        mode,
        last_seen: chunk.last_seen,
        attrs,
    }
}

/// Parser worker: consumes chunks until the channel closes.
pub async fn run(
    rx: &mut mpsc::Receiver<MessageChunk>,
    tx: &mpsc::Sender<ParsedAttributes>,
    stats: &PipelineStats,
) {
    while let Some(chunk) = rx.recv().await {
        let parsed = parse_chunk(&chunk);
        stats.record_parsed();
        if tx.send(parsed).await.is_err() {
            return;
        }
    }
    debug!("chunk stream ended, parser stopping");
}

/// A chunk is LE when its first body line opens an LE sub-event block;
/// everything else is classic.
fn detect_mode(body: &[String]) -> Transport {
    match body.first() {
        Some(first) if first.trim_start().starts_with("LE ") => Transport::Le,
        _ => Transport::Classic,
    }
}

fn parse_groups(lines: &[&str], mode: Transport, attrs: &mut AttributeMap) {
    for grp in group_by_depth(lines) {
        parse_group(&grp, mode, attrs);
    }
}

fn parse_group(grp: &[&str], mode: Transport, attrs: &mut AttributeMap) {
    let Some((first, rest)) = grp.split_first() else {
        return;
    };

    if grp.len() == 1 {
        line::parse_line(first, mode, attrs);
        return;
    }

    let head = first.trim();

    if SUB_TRANSPORT_MARKERS.iter().any(|m| head.starts_with(m)) {
        parse_groups(rest, mode, attrs);
        return;
    }

    if head.starts_with("Features") {
        store_joined(grp, scoped(mode, "features"), attrs);
        return;
    }

    if head.starts_with("Channels") {
        store_joined(grp, scoped(mode, "channels"), attrs);
        return;
    }

    if head.contains("128-bit Service UUIDs") {
        store_each(rest, scoped(mode, "128_bit_service_uuids"), attrs);
        return;
    }

    if head.contains("16-bit Service UUIDs") {
        store_each(rest, scoped(mode, "16_bit_service_uuids"), attrs);
        return;
    }

    if head.starts_with("Class") {
        parse_class_group(grp, mode, attrs);
        return;
    }

    if head.starts_with("Manufacturer") {
        for l in grp {
            line::parse_line(l, mode, attrs);
        }
        return;
    }

    // Unrecognized multi-line group: preserved verbatim for diagnostics.
    debug!(head, lines = grp.len(), "unrecognized group");
    for l in grp {
        push(attrs, scoped(mode, "unknown"), l.trim().to_string());
    }
}

/// Join the header text with all stripped body lines into a single value.
fn store_joined(grp: &[&str], key: String, attrs: &mut AttributeMap) {
    let value = grp
        .iter()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join(", ");
    push(attrs, key, value);
}

/// Store every stripped line as a separate value, header discarded.
fn store_each(rest: &[&str], key: String, attrs: &mut AttributeMap) {
    for l in rest {
        push(attrs, key.clone(), l.trim().to_string());
    }
}

/// `Class:` group: major/minor class become dedicated scalars; the class
/// value and anything unmatched accumulate into the class list.
fn parse_class_group(grp: &[&str], mode: Transport, attrs: &mut AttributeMap) {
    for l in grp {
        let t = l.trim();
        if let Some(v) = t.strip_prefix("Major class: ") {
            push(attrs, scoped(mode, "major_class"), v.to_string());
        } else if let Some(v) = t.strip_prefix("Minor class: ") {
            push(attrs, scoped(mode, "minor_class"), v.to_string());
        } else if let Some(v) = t.strip_prefix("Class: ") {
            push(attrs, scoped(mode, "class"), v.to_string());
        } else {
            push(attrs, scoped(mode, "class"), t.to_string());
        }
    }
}

fn scoped(mode: Transport, name: &str) -> String {
    format!("{}_{name}", mode.prefix())
}

fn push(attrs: &mut AttributeMap, key: String, value: String) {
    attrs.entry(key).or_default().push(value);
}
