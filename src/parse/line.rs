//! Single-line attribute extraction.

use crate::device::Transport;

use super::{push, scoped, AttributeMap};

/// Lines matched and intentionally discarded.
const NOISE_PREFIXES: &[&str] = &[
    "Attribute data length",
    "Attribute group list",
    "Reason",
    "Result",
];

/// Where a matched prefix's value is stored.
enum Rule {
    /// Key scoped by the chunk's transport (`classic_x` / `le_x`).
    Scoped(&'static str),
    /// Fixed, transport-independent key.
    Fixed(&'static str),
    /// Address line: the value splits into the address proper and an
    /// optional trailing vendor annotation.
    Address,
}

/// Known field prefixes, in match priority order. Longer prefixes precede
/// their shorter overlaps (`Peer address type:` before `Peer address:`).
const TABLE: &[(&str, Rule)] = &[
    ("Peer address type: ", Rule::Scoped("address_type")),
    ("Peer address: ", Rule::Address),
    ("Address type: ", Rule::Scoped("address_type")),
    ("Address: ", Rule::Address),
    ("LMP version: ", Rule::Scoped("lmp_version")),
    ("LL version: ", Rule::Scoped("lmp_version")),
    ("Manufacturer: ", Rule::Scoped("manufacturer")),
    ("Company: ", Rule::Fixed("company")),
    ("Type: ", Rule::Fixed("company_type")),
    ("UUID: ", Rule::Fixed("le_proximity_uuid")),
    ("Major: ", Rule::Fixed("le_major")),
    ("Minor: ", Rule::Fixed("le_minor")),
    ("Version: ", Rule::Scoped("version")),
    ("Measured power: ", Rule::Scoped("tx_power")),
    ("TX power: ", Rule::Scoped("tx_power")),
    ("Tx power: ", Rule::Scoped("tx_power")),
    ("Name (complete): ", Rule::Fixed("name")),
    ("Name (short): ", Rule::Fixed("name")),
    ("Name: ", Rule::Fixed("name")),
    ("RSSI: ", Rule::Scoped("rssi")),
    ("Appearance: ", Rule::Fixed("appearance")),
    ("Flags: ", Rule::Scoped("flags")),
    ("Features: ", Rule::Scoped("features")),
    ("Channels: ", Rule::Scoped("channels")),
    ("Major class: ", Rule::Scoped("major_class")),
    ("Minor class: ", Rule::Scoped("minor_class")),
    ("Status: ", Rule::Scoped("status")),
    ("Handle: ", Rule::Scoped("handle")),
    ("Encryption: ", Rule::Scoped("encryption")),
    ("Link type: ", Rule::Scoped("link_type")),
    ("Role: ", Rule::Scoped("role")),
    ("Mode: ", Rule::Scoped("mode")),
    ("Connection interval: ", Rule::Scoped("connection_interval")),
    ("Connection latency: ", Rule::Scoped("connection_latency")),
    ("Supervision timeout: ", Rule::Scoped("supervision_timeout")),
    ("Data: ", Rule::Scoped("company_data")),
    ("Firmware: ", Rule::Scoped("firmware")),
    ("Num responses: ", Rule::Scoped("num_responses")),
    ("Page period mode: ", Rule::Scoped("page_period_mode")),
    ("Page scan repetition mode: ", Rule::Scoped("page_scan_repetition_mode")),
];

/// Prefix matched without a fixed colon position; the value follows the
/// first `": "` (e.g. `Service Data (UUID 0xfe9f): ...`).
const SERVICE_DATA_PREFIX: &str = "Service Data";

/// Parse one line into the attribute map. Unmatched lines land in the
/// transport-scoped `unknown` bucket, never dropped.
pub(super) fn parse_line(line: &str, mode: Transport, attrs: &mut AttributeMap) {
    let text = line.trim();
    if text.is_empty() {
        return;
    }

    for noise in NOISE_PREFIXES {
        if text.starts_with(noise) {
            return;
        }
    }

    for (prefix, rule) in TABLE {
        if let Some(value) = text.strip_prefix(prefix) {
            apply(rule, value.trim(), mode, attrs);
            return;
        }
    }

    if text.starts_with(SERVICE_DATA_PREFIX) {
        if let Some((_, value)) = text.split_once(": ") {
            push(attrs, scoped(mode, "service_data"), value.trim().to_string());
            return;
        }
    }

    push(attrs, scoped(mode, "unknown"), text.to_string());
}

fn apply(rule: &Rule, value: &str, mode: Transport, attrs: &mut AttributeMap) {
    match rule {
        Rule::Scoped(name) => push(attrs, scoped(mode, name), value.to_string()),
        Rule::Fixed(key) => push(attrs, (*key).to_string(), value.to_string()),
        Rule::Address => {
            let (address, annotation) = split_address_annotation(value);
            push(attrs, "address".to_string(), address.to_string());
            if let Some(annotation) = annotation {
                push(attrs, "oui".to_string(), annotation.to_string());
            }
        }
    }
}

/// Split `AA:BB:CC:DD:EE:FF (Vendor X)` into the address proper and the
/// trailing vendor annotation, if present.
fn split_address_annotation(value: &str) -> (&str, Option<&str>) {
    match value.split_once(' ') {
        Some((address, rest)) => {
            let rest = rest.trim();
            if rest.is_empty() {
                (address, None)
            } else {
                (address, Some(rest))
            }
        }
        None => (value, None),
    }
}
