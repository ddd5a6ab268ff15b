//! Passive/active Bluetooth presence sensor.
//!
//! Consumes the textual trace emitted by the host controller's monitoring
//! interface (`btmon -T` output with color codes stripped), reassembles
//! per-event message chunks, parses each chunk into attribute observations,
//! merges those observations into per-device state, and schedules active
//! probes (info queries, liveness pings) against the radio to keep device
//! records fresh.

pub mod agent;
pub mod chunk;
pub mod config;
pub mod device;
pub mod exec;
pub mod merge;
pub mod parse;
pub mod probe;
pub mod publish;
pub mod stats;
pub mod store;
