//! Device merge engine.
//!
//! Folds parsed attribute batches into per-device state through the field
//! strategy table, resolving addresses against the store (with fuzzy
//! fallbacks for rotating LE addresses) and emitting a change notification
//! only when persisted state actually changed.

pub mod policy;
pub mod sweep;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::device::{canonical_address, uap_lap, DeviceDelta, DeviceState, Status, Transport};
use crate::parse::{AttributeMap, ParsedAttributes};
use crate::publish::ChangeSink;
use crate::stats::PipelineStats;
use crate::store::DeviceStore;

use self::policy::FieldPolicy;

pub struct MergeEngine {
    store: Arc<dyn DeviceStore>,
    delta_tx: mpsc::UnboundedSender<DeviceDelta>,
    sink: Arc<dyn ChangeSink>,
    stats: Arc<PipelineStats>,
}

impl MergeEngine {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        delta_tx: mpsc::UnboundedSender<DeviceDelta>,
        sink: Arc<dyn ChangeSink>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            store,
            delta_tx,
            sink,
            stats,
        }
    }

    /// Merge worker: consumes parsed batches until the channel closes.
    pub async fn run(&self, rx: &mut mpsc::Receiver<ParsedAttributes>) {
        while let Some(parsed) = rx.recv().await {
            if let Some((device, delta)) = self.merge(&parsed) {
                self.stats.record_delta();
                self.sink.publish(&device, &delta);
                if self.delta_tx.send(delta).is_err() {
                    return;
                }
            }
        }
        debug!("parsed stream ended, merge engine stopping");
    }

    /// Fold one batch into stored state. Returns the updated record and its
    /// delta when anything changed; `None` leaves the store untouched.
    pub fn merge(&self, parsed: &ParsedAttributes) -> Option<(DeviceState, DeviceDelta)> {
        let Some(addresses) = parsed.attrs.get("address") else {
            debug!("attribute batch without address, skipping");
            return None;
        };
        let address = canonical_address(first_distinct("address", addresses)?);

        let (mut record, existing) = self.resolve(&address, &parsed.attrs);
        let mut changed: Vec<&'static str> = Vec::new();

        match parsed.mode {
            Transport::Classic => {
                if !record.classic_mode {
                    record.classic_mode = true;
                    changed.push("classic_mode");
                }
            }
            Transport::Le => {
                if !record.le_mode {
                    record.le_mode = true;
                    changed.push("le_mode");
                }
            }
        }

        for (key, values) in &parsed.attrs {
            if key == "address" || key == "unknown" || key.ends_with("_unknown") {
                continue;
            }

            let Some(spec) = policy::lookup(key) else {
                debug!(attribute = %key, "untracked attribute");
                continue;
            };

            match &spec.policy {
                FieldPolicy::Replace(slot) => {
                    let Some(value) = first_distinct(key, values) else {
                        continue;
                    };
                    if record.scalar(*slot) != Some(value) {
                        record.set_scalar(*slot, value.to_string());
                        changed.push(spec.key);
                    }
                }
                FieldPolicy::Union { slot, annotate } => {
                    for value in values {
                        let item = if *annotate && !value.contains('(') {
                            format!("Unknown ({value})")
                        } else {
                            value.clone()
                        };
                        if !record.list_contains(*slot, &item) {
                            record.list_push(*slot, item);
                            if !changed.contains(&spec.key) {
                                changed.push(spec.key);
                            }
                        }
                    }
                }
                FieldPolicy::Rssi(slot) => {
                    let Some(value) = first_distinct(key, values) else {
                        continue;
                    };
                    if record.observe_rssi(*slot, value, parsed.last_seen) {
                        changed.push(spec.key);
                    }
                }
            }
        }

        if record.observe_last_seen(parsed.last_seen) {
            changed.push("last_seen");
        }

        if record.status != Status::Online {
            record.status = Status::Online;
            changed.push("status");
        }

        if changed.is_empty() {
            return None;
        }

        if existing {
            self.store.update(&record);
        } else {
            self.store.create(record.clone());
        }

        let delta = DeviceDelta {
            address: record.address.clone(),
            transport: parsed.mode,
            status: record.status,
            last_seen: record.last_seen,
            changed,
        };
        Some((record, delta))
    }

    /// Resolve the record a batch merges into. Primary key is the literal
    /// address; failing that, fuzzy fallbacks run in fixed order (suffix,
    /// beacon identity, vendor payload). The matched record keeps its own
    /// address.
    fn resolve(&self, address: &str, attrs: &AttributeMap) -> (DeviceState, bool) {
        if let Some(record) = self.store.get(address) {
            return (record, true);
        }

        if let Some(record) = self.store.find_by_uap_lap(&uap_lap(address)) {
            debug!(observed = %address, matched = %record.address, "matched by address suffix");
            return (record, true);
        }

        if let (Some(uuid), Some(major), Some(minor)) = (
            first_value(attrs, "le_proximity_uuid"),
            first_value(attrs, "le_major"),
            first_value(attrs, "le_minor"),
        ) {
            if let Some(record) = self.store.find_by_beacon(uuid, major, minor) {
                debug!(observed = %address, matched = %record.address, "matched by beacon identity");
                return (record, true);
            }
        }

        if let (Some(company), Some(payload)) = (
            first_value(attrs, "company"),
            first_value(attrs, "le_company_data"),
        ) {
            if let Some(record) = self.store.find_by_company_payload(company, payload) {
                debug!(observed = %address, matched = %record.address, "matched by vendor payload");
                return (record, true);
            }
        }

        (DeviceState::new(address), false)
    }
}

fn first_value<'a>(attrs: &'a AttributeMap, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(|v| v.first()).map(String::as_str)
}

/// Deduplicate a batch's values for one field; when more than one distinct
/// value remains, keep the first and raise a diagnostic.
fn first_distinct<'a>(key: &str, values: &'a [String]) -> Option<&'a str> {
    let first = values.first()?;
    if values.iter().any(|v| v != first) {
        warn!(
            attribute = key,
            kept = %first,
            "conflicting values within one batch, keeping the first",
        );
    }
    Some(first.as_str())
}
