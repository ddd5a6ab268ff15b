//! Change publication contract.
//!
//! The merge engine reports exactly which fields changed on each update so
//! a downstream sync channel can be driven efficiently. The sink itself is
//! an external collaborator; the crate ships a logging implementation.

use tracing::debug;

use crate::device::{DeviceDelta, DeviceState};

/// Schema version of the published representation.
pub const SYNC_SCHEMA_VERSION: u32 = 1;

/// Consumer of qualifying device changes.
pub trait ChangeSink: Send + Sync {
    /// Returns the sink's name for logging.
    fn name(&self) -> &'static str;

    /// Accept one device change. `delta.changed` names every field the
    /// merge or sweep actually modified.
    fn publish(&self, device: &DeviceState, delta: &DeviceDelta);
}

/// Sink that records each change to the log stream.
#[derive(Default)]
pub struct LogSink;

impl ChangeSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn publish(&self, device: &DeviceState, delta: &DeviceDelta) {
        debug!(
            version = SYNC_SCHEMA_VERSION,
            address = %delta.address,
            status = device.status.as_str(),
            changed = ?delta.changed,
            "device changed",
        );
    }
}

/// Sink that discards changes; used when no sync channel is configured.
#[derive(Default)]
pub struct NoopSink;

impl ChangeSink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn publish(&self, _device: &DeviceState, _delta: &DeviceDelta) {}
}
